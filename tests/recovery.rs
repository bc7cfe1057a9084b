use std::sync::{Arc, Mutex};

use http::StatusCode;
use keel::middleware::{PanicReport, Recovery};
use keel::{Pipeline, Request, RequestHead, Response};

#[inline(never)]
fn die() -> Response {
    panic!("I died")
}

async fn dying(_req: Request) -> Response {
    die()
}

fn capture_reports(
    reports: Arc<Mutex<Vec<PanicReport>>>,
) -> impl Fn(&RequestHead, PanicReport) -> Response + Send + Sync + 'static {
    move |_head: &RequestHead, report: PanicReport| {
        reports.lock().unwrap().push(report);
        Response::status(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

#[tokio::test]
async fn trace_starts_at_the_panicking_function() {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let app = Pipeline::new(Recovery::new(dying).on_recovered(capture_reports(Arc::clone(&reports))));

    let res = app.handle(Request::builder().build()).await;

    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.payload.as_str(), Some("I died"));

    let trace = &report.trace;
    assert!(!trace.is_empty());
    let first = &trace.frames()[0];
    assert!(first.function.ends_with("::die"), "first frame {first:?} of\n{trace}");
    assert!(first.file.ends_with("recovery.rs"), "first frame {first:?}");
    assert!(first.line > 0);
}

#[tokio::test]
async fn trace_reaches_the_calling_handler() {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let app = Pipeline::new(Recovery::new(dying).on_recovered(capture_reports(Arc::clone(&reports))));

    app.handle(Request::builder().build()).await;

    let reports = reports.lock().unwrap();
    let functions: Vec<_> = reports[0].trace.frames().iter().map(|f| f.function.as_str()).collect();
    assert!(
        functions.iter().any(|f| f.contains("dying")),
        "no frame for the handler in {functions:#?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_panics_keep_their_own_reports() {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let app = Pipeline::new(
        Recovery::new(|req: Request| async move {
            let n = req.header("x-n").unwrap_or_default().to_owned();
            if n.parse::<u32>().is_ok_and(|n| n % 2 == 0) {
                panic!("request {n} died");
            }
            Response::text(n)
        })
        .on_recovered(capture_reports(Arc::clone(&reports))),
    );

    let mut tasks = tokio::task::JoinSet::new();
    for n in 0..64 {
        let app = app.clone();
        tasks.spawn(async move {
            let req = Request::builder().header("x-n", &n.to_string()).build();
            (n, app.handle(req).await.status_code())
        });
    }
    while let Some(joined) = tasks.join_next().await {
        let (n, status) = joined.unwrap();
        let expected = if n % 2 == 0 { StatusCode::INTERNAL_SERVER_ERROR } else { StatusCode::OK };
        assert_eq!(status, expected, "request {n}");
    }

    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 32);
    for report in reports.iter() {
        assert!(!report.trace.is_empty());
        assert!(report.payload.to_string().ends_with(" died"));
    }
}
