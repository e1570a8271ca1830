use std::time::Duration;

use chrono::NaiveDate;
use tally::{
    aggregator::{Aggregator, Settings},
    config::Config,
    query::CountersService,
    recorder::OperationRecorder,
    registry::LocalCounters,
    writer::BatchWriter,
};
use tally_clock::{Clock, ManualClock};
use tally_counter::{Average, Mean, Sum, Value};
use tally_store::{FsQueue, FsStore};

// 2015-05-15T23:59:50Z, the last window of the day
const LATE: f64 = 1_431_734_390.0;

#[tokio::test]
async fn counters_flow_from_request_to_query() {
    let tmp_dir = tempfile::tempdir().expect("directory could not be created");
    let config = Config::parse(
        r#"
counters:
  - name: "page/view"
    kind: sum
  - name: "page/size"
    kind: average
operations:
  - "files/get"
"#,
    )
    .expect("valid config");

    let clock = ManualClock::new(LATE);
    let queue = FsQueue::with_clock(tmp_dir.path().join("queue"), clock.clone())
        .await
        .expect("queue opens");
    let writer = BatchWriter::with_clock(
        queue,
        clock.clone(),
        config.window_size_seconds,
        config.lease_buffer(),
    );

    // three requests in the same window
    for size in [10.0, 20.0, 30.0] {
        let mut scope = LocalCounters::new();
        let mut views = Sum::new("page/view").expect("valid name");
        views.increment();
        let mut page_size = Average::new("page/size").expect("valid name");
        page_size.offset(size);
        scope.store([views]);
        scope.store([page_size]);
        OperationRecorder::new("files/get")
            .expect("valid name")
            .record(&mut scope, || ());
        scope.save(&writer).await.expect("save");
    }
    // one request in the first window of the next day
    clock.advance(Duration::from_secs(10));
    let mut scope = LocalCounters::new();
    let mut views = Sum::new("page/view").expect("valid name");
    views.offset(5);
    scope.store([views]);
    scope.save(&writer).await.expect("save");

    let store = FsStore::new(tmp_dir.path().join("store"))
        .await
        .expect("store opens");
    let queue = FsQueue::with_clock(tmp_dir.path().join("queue"), clock.clone())
        .await
        .expect("queue reopens");
    let mut aggregator = Aggregator::new(
        queue,
        store.clone(),
        clock.clone(),
        config.counters().expect("valid counters"),
        config.aggregator_settings(),
    )
    .expect("unique names");

    // nothing has matured yet: 1 + 2 + 4 + 8 seconds of backoff, then the
    // next 10 second wait would cross the deadline
    let results = aggregator
        .process_windows_with_backoff(Duration::from_secs(20), false)
        .await
        .expect("aggregate");
    assert!(results.iter().all(Option::is_none));

    clock.advance(Duration::from_secs(60));
    let results = aggregator
        .process_windows_with_backoff(Duration::from_secs(1), false)
        .await
        .expect("aggregate");
    let windows: Vec<_> = results.into_iter().flatten().collect();
    assert_eq!(windows.len(), 2);
    assert_eq!(windows[0].window, 1_431_734_390);
    assert_eq!(windows[0].counters.len(), 4);
    assert_eq!(windows[1].window, 1_431_734_400);
    assert_eq!(windows[1].counters.len(), 1);

    let service = CountersService::with_clock(store, clock.clone(), Settings::default().base_dir);
    let data = service
        .get_counter_data(
            ["page/view", "page/size", "files/get", "files/get/latency"],
            NaiveDate::from_ymd_opt(2015, 5, 15),
            NaiveDate::from_ymd_opt(2015, 5, 16),
        )
        .await
        .expect("query");

    assert_eq!(
        data["page/view"],
        vec![(1_431_734_390, Value::Count(3)), (1_431_734_400, Value::Count(5))]
    );
    assert_eq!(
        data["page/size"],
        vec![(1_431_734_390, Value::Weighted(Mean::Float(20.0), 3))]
    );
    assert_eq!(data["files/get"], vec![(1_431_734_390, Value::Count(3))]);
    assert!(matches!(
        data["files/get/latency"][..],
        [(1_431_734_390, Value::Weighted(Mean::Int(_), 3))]
    ));

    // only the second day, defaulting the end to today
    let today = service
        .get_counter_data(["page/view"], NaiveDate::from_ymd_opt(2015, 5, 16), None)
        .await
        .expect("query");
    assert!(clock.now() > LATE);
    assert_eq!(
        today["page/view"],
        vec![(1_431_734_400, Value::Count(5))]
    );
}
