//! Status assembler scenarios: documents combine live state with history.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::TestHome;
use laminar_protocol::event::{Event, StatusData};
use laminar_protocol::{MonitorScope, RunState};
use tokio::time::timeout;

async fn run_job_to_completion(engine: &laminard::engine::Engine, job: &str) {
    let mut waiter = engine.add_waiter().await.unwrap();
    engine.queue_job(job, HashMap::new()).await.unwrap();
    timeout(Duration::from_secs(20), waiter.recv())
        .await
        .expect("timed out waiting for completion")
        .expect("waiter channel closed");
}

#[tokio::test]
async fn job_status_reports_history_and_extremes() {
    let home = TestHome::new();
    home.write_script("flaky", "run", "test -f \"$WORKSPACE/fail\" && exit 1 || touch \"$WORKSPACE/fail\"");
    let (engine, _handle) = home.engine();

    // first run succeeds, second fails
    run_job_to_completion(&engine, "flaky").await;
    run_job_to_completion(&engine, "flaky").await;

    let event = engine
        .status(MonitorScope::Job {
            name: "flaky".into(),
            page: 0,
            field: "number".into(),
            order_desc: true,
        })
        .await
        .unwrap();
    let Event::Status { data: StatusData::Job(job), .. } = event else {
        panic!("expected job status, got {event:?}");
    };

    assert_eq!(job.pages, 1);
    assert_eq!(job.n_queued, 0);
    assert_eq!(job.recent.len(), 2);
    assert_eq!(job.recent[0].number, 2);
    assert_eq!(job.recent[0].result, RunState::Failed);
    assert_eq!(job.recent[1].result, RunState::Success);
    assert_eq!(job.last_success.as_ref().unwrap().number, 1);
    assert_eq!(job.last_failed.as_ref().unwrap().number, 2);
    assert_eq!(job.sort.order, "dsc");
}

#[tokio::test]
async fn run_status_prefers_live_state_and_estimates_completion() {
    let home = TestHome::new();
    home.write_script("steady", "run", "sleep 1");
    let (engine, _handle) = home.engine();

    // one completed build gives the estimator a duration to work with
    run_job_to_completion(&engine, "steady").await;

    let queued = engine.queue_job("steady", HashMap::new()).await.unwrap();
    let number = timeout(Duration::from_secs(10), queued.started).await.unwrap().unwrap();
    assert_eq!(number, 2);

    let event = engine
        .status(MonitorScope::Run { name: "steady".into(), number: 2 })
        .await
        .unwrap();
    let Event::Status { data: StatusData::Run(run), .. } = event else {
        panic!("expected run status, got {event:?}");
    };
    assert_eq!(run.result, RunState::Running);
    assert_eq!(run.latest_num, 2);
    assert!(run.completed.is_none());
    let etc = run.etc.expect("estimate missing despite known duration");
    assert!(etc >= run.started);

    // after completion the document comes from the database
    let mut waiter = engine.add_waiter().await.unwrap();
    timeout(Duration::from_secs(20), waiter.recv()).await.unwrap().unwrap();
    let event = engine
        .status(MonitorScope::Run { name: "steady".into(), number: 2 })
        .await
        .unwrap();
    let Event::Status { data: StatusData::Run(run), .. } = event else {
        panic!("expected run status, got {event:?}");
    };
    assert_eq!(run.result, RunState::Success);
    assert!(run.completed.is_some());
}

#[tokio::test]
async fn all_and_home_scopes_summarize_jobs() {
    let home = TestHome::new();
    home.write_script("alpha", "run", "echo a");
    home.write_script("beta", "run", "echo b");
    home.write_job_conf("alpha", "TAGS=linux\n");
    let (engine, _handle) = home.engine();

    run_job_to_completion(&engine, "alpha").await;
    run_job_to_completion(&engine, "beta").await;
    run_job_to_completion(&engine, "beta").await;

    let event = engine.status(MonitorScope::All).await.unwrap();
    let Event::Status { data: StatusData::All(all), .. } = event else {
        panic!("expected all status, got {event:?}");
    };
    assert_eq!(all.jobs.len(), 2);
    let alpha = all.jobs.iter().find(|j| j.name == "alpha").unwrap();
    assert_eq!(alpha.number, 1);
    assert_eq!(alpha.tags, vec!["linux".to_string()]);
    let beta = all.jobs.iter().find(|j| j.name == "beta").unwrap();
    assert_eq!(beta.number, 2);
    assert!(all.running.is_empty());

    let event = engine.status(MonitorScope::Home).await.unwrap();
    let Event::Status { data: StatusData::Home(home_status), .. } = event else {
        panic!("expected home status, got {event:?}");
    };
    assert_eq!(home_status.recent.len(), 3);
    assert_eq!(home_status.builds_per_day.len(), 7);
    // all three completions happened today
    let today = home_status.builds_per_day.last().unwrap();
    assert_eq!(today["success"], 3);
    assert_eq!(home_status.builds_per_job["beta"], 2);
    assert_eq!(home_status.builds_per_job["alpha"], 1);
    assert!(home_status.time_per_job.contains_key("beta"));
}
