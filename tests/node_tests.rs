//! Node assembly with file-backed state and recovery across restarts.


use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use talent_scout::cache::CacheStore;
use talent_scout::collaborators::fixture::{FixtureCollaborators, FixtureData};
use talent_scout::collaborators::SearchMethod;
use talent_scout::config::PipelineConfig;
use talent_scout::node::Node;
use talent_scout::scheduler::{JobInput, JobStatus};
use test_harness::{assert_eventually, profile, profile_url, test_config, uniform};

fn fixture() -> FixtureCollaborators {
    let urls = vec![profile_url("ana"), profile_url("ben")];
    let mut data = FixtureData::default();
    data.searches.insert("default".to_string(), urls.clone());
    data.profiles = urls
        .iter()
        .zip(["Ana Lima", "Ben Okafor"])
        .map(|(url, name)| (url.clone(), profile(name)))
        .collect::<HashMap<_, _>>();
    data.scores.insert("ana".to_string(), uniform(8.4));
    data.scores.insert("ben".to_string(), uniform(6.1));
    FixtureCollaborators::new(data)
}

fn file_backed(dir: &std::path::Path) -> PipelineConfig {
    let mut config = test_config();
    config.cache.directory = Some(dir.join("cache"));
    config.retention.directory = Some(dir.join("jobs"));
    config.queue.journal_path = Some(dir.join("queue.json"));
    config
}

#[tokio::test]
async fn unfinished_jobs_survive_restart_and_complete() {
    let dir = tempfile::tempdir().unwrap();
    let input = JobInput::new("Backend engineer", SearchMethod::GoogleCrawler, 2);

    let id = {
        let node = Node::new(file_backed(dir.path()), fixture().into_collaborators())
            .await
            .unwrap();
        let id = node.orchestrator().submit_job(input).await.unwrap();
        // Node dropped before any worker ran.
        id
    };

    let node = Node::new(file_backed(dir.path()), fixture().into_collaborators())
        .await
        .unwrap();
    let orchestrator = node.orchestrator().clone();
    assert_eq!(
        orchestrator.get_status(id).await.unwrap().status,
        JobStatus::Pending
    );
    // The journal already holds the job, so nothing new is enqueued.
    assert_eq!(node.recover_jobs().await.unwrap(), 0);

    let shutdown = CancellationToken::new();
    let running = tokio::spawn(node.run(shutdown.clone()));

    let watched = orchestrator.clone();
    assert_eventually(
        || {
            let watched = watched.clone();
            async move { watched.get_status(id).await.unwrap().status == JobStatus::Completed }
        },
        Duration::from_secs(5),
        "recovered job should complete",
    )
    .await;

    let result = orchestrator.get_result(id).await.unwrap();
    let names: Vec<&str> = result
        .results
        .iter()
        .map(|r| r.record.attributes.name.as_str())
        .collect();
    assert_eq!(names, vec!["Ana Lima", "Ben Okafor"]);
    assert_eq!(orchestrator.cache().len().await.unwrap(), 2);

    shutdown.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn job_store_without_journal_re_enqueues_on_start() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = file_backed(dir.path());
    config.queue.journal_path = None;

    let id = {
        let node = Node::new(config.clone(), fixture().into_collaborators())
            .await
            .unwrap();
        let id = node
            .orchestrator()
            .submit_job(JobInput::new("Data engineer", SearchMethod::RapidApi, 1))
            .await
            .unwrap();
        id
    };

    let node = Node::new(config, fixture().into_collaborators())
        .await
        .unwrap();
    assert_eq!(node.orchestrator().queue().depth().await.ready, 0);
    assert_eq!(node.recover_jobs().await.unwrap(), 1);

    let lease = node
        .orchestrator()
        .queue()
        .try_dequeue("w")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lease.job_id(), id);
}

#[tokio::test]
async fn terminal_jobs_are_not_recovered() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = file_backed(dir.path());
    config.queue.journal_path = None;

    {
        let node = Node::new(config.clone(), fixture().into_collaborators())
            .await
            .unwrap();
        let id = node
            .orchestrator()
            .submit_job(JobInput::new("Data engineer", SearchMethod::RapidApi, 1))
            .await
            .unwrap();
        node.orchestrator().cancel_job(id).await.unwrap();
    }

    let node = Node::new(config, fixture().into_collaborators())
        .await
        .unwrap();
    assert_eq!(node.recover_jobs().await.unwrap(), 0);
    assert_eq!(node.orchestrator().list_jobs().await.len(), 1);
}
