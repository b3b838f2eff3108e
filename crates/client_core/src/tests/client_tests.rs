use super::*;
use anyhow::anyhow;
use async_trait::async_trait;
use shared::protocol::{RankResponse, TagMutationResponse, TierResponse};
use crate::store::FieldState;
use std::collections::VecDeque;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};

enum Reply {
    Rank(i64),
    Tier(Tier),
    Tag(bool),
    Fail(String),
}

struct Call {
    route: String,
    reply: oneshot::Sender<Reply>,
}

/// Backend whose every mutation blocks until the test answers it, so
/// responses can be delivered in any order.
struct ScriptedBackend {
    lists: Mutex<VecDeque<Result<Vec<Company>, String>>>,
    calls: mpsc::UnboundedSender<Call>,
}

impl ScriptedBackend {
    fn new(
        lists: Vec<Result<Vec<Company>, String>>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Call>) {
        let (calls, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                lists: Mutex::new(lists.into()),
                calls,
            }),
            rx,
        )
    }

    async fn call(&self, route: String) -> Result<Reply> {
        let (reply, rx) = oneshot::channel();
        self.calls
            .send(Call { route, reply })
            .map_err(|_| anyhow!("test harness dropped"))?;
        match rx.await? {
            Reply::Fail(message) => Err(anyhow!(message)),
            reply => Ok(reply),
        }
    }

    async fn rank_call(&self, route: String) -> Result<RankResponse> {
        match self.call(route).await? {
            Reply::Rank(rank) => Ok(RankResponse { rank }),
            _ => Err(anyhow!("unexpected reply kind")),
        }
    }

    async fn tag_call(&self, route: String) -> Result<TagMutationResponse> {
        match self.call(route).await? {
            Reply::Tag(true) => Ok(TagMutationResponse { success: true }),
            _ => Err(anyhow!("tag mutation rejected")),
        }
    }
}

#[async_trait]
impl CompanyBackend for ScriptedBackend {
    async fn list_companies(&self) -> Result<Vec<Company>> {
        match self.lists.lock().await.pop_front() {
            Some(Ok(companies)) => Ok(companies),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("connection refused")),
        }
    }

    async fn upvote(&self, id: CompanyId) -> Result<RankResponse> {
        self.rank_call(format!("upvote {id}")).await
    }

    async fn downvote(&self, id: CompanyId) -> Result<RankResponse> {
        self.rank_call(format!("downvote {id}")).await
    }

    async fn update_rank(&self, id: CompanyId, rank: i64) -> Result<RankResponse> {
        self.rank_call(format!("rank {id}={rank}")).await
    }

    async fn update_tier(&self, id: CompanyId, tier: &Tier) -> Result<TierResponse> {
        match self.call(format!("tier {id}={tier}")).await? {
            Reply::Tier(tier) => Ok(TierResponse { tier }),
            _ => Err(anyhow!("unexpected reply kind")),
        }
    }

    async fn add_tag(&self, id: CompanyId, tag: &str) -> Result<TagMutationResponse> {
        self.tag_call(format!("tag {id}+{tag}")).await
    }

    async fn remove_tag(&self, id: CompanyId, index: usize) -> Result<TagMutationResponse> {
        self.tag_call(format!("tag {id}-{index}")).await
    }
}

fn sample_companies() -> Vec<Company> {
    let mut acme = Company::new(CompanyId(1), "Acme");
    acme.tier = Tier::B;
    acme.rank = 3;
    acme.tags = vec!["ai".into()];
    let mut zed = Company::new(CompanyId(2), "Zed");
    zed.tier = Tier::A;
    zed.rank = 1;
    vec![acme, zed]
}

async fn loaded_client() -> (Arc<DirectoryClient>, mpsc::UnboundedReceiver<Call>) {
    let (backend, calls) = ScriptedBackend::new(vec![Ok(sample_companies())]);
    let client = DirectoryClient::new(backend);
    client.load().await.expect("load");
    (client, calls)
}

fn spawn_mutation<F, Fut>(client: &Arc<DirectoryClient>, op: F) -> JoinHandle<Result<MutationOutcome, DirectoryError>>
where
    F: FnOnce(Arc<DirectoryClient>) -> Fut,
    Fut: std::future::Future<Output = Result<MutationOutcome, DirectoryError>> + Send + 'static,
{
    tokio::spawn(op(Arc::clone(client)))
}

async fn rank_of(client: &DirectoryClient, id: i64) -> i64 {
    client.company(CompanyId(id)).await.expect("company").rank
}

#[tokio::test]
async fn load_fills_cache_and_view_orders_by_tier() {
    let (client, _calls) = loaded_client().await;
    let names: Vec<String> = client
        .view(&ViewFilter::default())
        .await
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["Zed", "Acme"]);
    assert_eq!(client.tag_vocabulary().await, vec!["ai"]);
}

#[tokio::test]
async fn failed_reload_keeps_previous_cache() {
    let (backend, _calls) =
        ScriptedBackend::new(vec![Ok(sample_companies()), Err("connection reset".into())]);
    let client = DirectoryClient::new(backend);
    client.load().await.expect("first load");
    let mut events = client.subscribe_events();

    let err = client.load().await.expect_err("second load fails");
    assert!(matches!(err, DirectoryError::Network(_)));
    assert_eq!(client.summary(&ViewFilter::default()).await.total, 2);
    assert!(matches!(events.recv().await, Ok(DirectoryEvent::Error(_))));
}

#[tokio::test]
async fn first_load_failure_leaves_cache_empty() {
    let (backend, _calls) = ScriptedBackend::new(Vec::new());
    let client = DirectoryClient::new(backend);
    assert!(client.load().await.is_err());
    assert!(client.view(&ViewFilter::default()).await.is_empty());
}

#[tokio::test]
async fn optimistic_rank_is_visible_before_response() {
    let (client, mut calls) = loaded_client().await;
    let task = spawn_mutation(&client, |c| async move { c.set_rank(CompanyId(1), 5).await });

    let call = calls.recv().await.expect("call");
    assert_eq!(call.route, "rank 1=5");
    assert_eq!(rank_of(&client, 1).await, 5);

    let _ = call.reply.send(Reply::Rank(5));
    let outcome = task.await.expect("join").expect("mutation");
    assert_eq!(outcome.optimistic.rank, 5);
    assert!(matches!(
        outcome.resolution,
        Resolution::Confirmed { changed: false, .. }
    ));
}

#[tokio::test]
async fn clamped_rank_is_what_gets_sent() {
    let (client, mut calls) = loaded_client().await;
    let task = spawn_mutation(&client, |c| async move { c.set_rank(CompanyId(1), 0).await });

    let call = calls.recv().await.expect("call");
    assert_eq!(call.route, "rank 1=1");
    let _ = call.reply.send(Reply::Rank(1));
    task.await.expect("join").expect("mutation");
    assert_eq!(rank_of(&client, 1).await, 1);
}

#[tokio::test]
async fn out_of_order_responses_keep_newest_value() {
    let (client, mut calls) = loaded_client().await;

    let older = spawn_mutation(&client, |c| async move { c.set_rank(CompanyId(1), 5).await });
    let older_call = calls.recv().await.expect("older call");
    let newer = spawn_mutation(&client, |c| async move { c.set_rank(CompanyId(1), 8).await });
    let newer_call = calls.recv().await.expect("newer call");
    assert_eq!(rank_of(&client, 1).await, 8);

    let _ = newer_call.reply.send(Reply::Rank(8));
    let newer_outcome = newer.await.expect("join").expect("newer");
    assert!(matches!(newer_outcome.resolution, Resolution::Confirmed { .. }));

    let _ = older_call.reply.send(Reply::Rank(5));
    let older_outcome = older.await.expect("join").expect("older");
    assert_eq!(older_outcome.resolution, Resolution::Superseded);
    assert_eq!(rank_of(&client, 1).await, 8);
}

#[tokio::test]
async fn rapid_upvotes_settle_on_last_server_answer() {
    let (client, mut calls) = loaded_client().await;
    let mut tasks = Vec::new();
    let mut pending = Vec::new();
    for _ in 0..3 {
        tasks.push(spawn_mutation(&client, |c| async move { c.upvote(CompanyId(1)).await }));
        pending.push(calls.recv().await.expect("call"));
    }
    assert_eq!(rank_of(&client, 1).await, 1);

    for (call, rank) in pending.into_iter().zip([2, 1, 1]) {
        assert_eq!(call.route, "upvote 1");
        let _ = call.reply.send(Reply::Rank(rank));
    }
    for task in tasks {
        task.await.expect("join").expect("upvote");
    }
    assert_eq!(rank_of(&client, 1).await, 1);
}

#[tokio::test]
async fn server_answer_overrides_optimistic_value() {
    let (client, mut calls) = loaded_client().await;
    let task = spawn_mutation(&client, |c| async move { c.downvote(CompanyId(2)).await });
    let call = calls.recv().await.expect("call");
    assert_eq!(rank_of(&client, 2).await, 2);

    let _ = call.reply.send(Reply::Rank(4));
    let outcome = task.await.expect("join").expect("downvote");
    match outcome.resolution {
        Resolution::Confirmed { company, changed } => {
            assert!(changed);
            assert_eq!(company.rank, 4);
        }
        other => panic!("unexpected resolution: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn failure_rolls_back_and_flag_clears_after_flash() {
    let (client, mut calls) = loaded_client().await;
    let mut events = client.subscribe_events();

    let task = spawn_mutation(&client, |c| async move { c.set_tier(CompanyId(1), Tier::A).await });
    let call = calls.recv().await.expect("call");
    assert_eq!(call.route, "tier 1=A");
    let _ = call.reply.send(Reply::Fail("request timed out".into()));

    let outcome = task.await.expect("join").expect("mutation");
    match &outcome.resolution {
        Resolution::RolledBack { company, error } => {
            assert_eq!(company.tier, Tier::B);
            assert!(matches!(error, DirectoryError::Network(_)));
        }
        other => panic!("unexpected resolution: {other:?}"),
    }
    assert!(client.has_error_flag(CompanyId(1)).await);

    loop {
        match events.recv().await.expect("event") {
            DirectoryEvent::ErrorFlagCleared(id) => {
                assert_eq!(id, CompanyId(1));
                break;
            }
            DirectoryEvent::CompanyUpdated(_) | DirectoryEvent::MutationRolledBack { .. } => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(!client.has_error_flag(CompanyId(1)).await);
}

#[tokio::test]
async fn rejected_tag_is_rolled_back() {
    let (client, mut calls) = loaded_client().await;
    let task = spawn_mutation(&client, |c| async move { c.add_tag(CompanyId(1), " b2b ").await });
    let call = calls.recv().await.expect("call");
    assert_eq!(call.route, "tag 1+b2b");
    let _ = call.reply.send(Reply::Tag(false));

    let outcome = task.await.expect("join").expect("mutation");
    assert_eq!(outcome.optimistic.tags, vec!["ai", "b2b"]);
    assert!(matches!(outcome.resolution, Resolution::RolledBack { .. }));
    assert_eq!(
        client.company(CompanyId(1)).await.expect("company").tags,
        vec!["ai"]
    );
}

#[tokio::test]
async fn tag_removal_confirms_without_touching_other_tags() {
    let (client, mut calls) = loaded_client().await;
    let task = spawn_mutation(&client, |c| async move { c.remove_tag(CompanyId(1), 0).await });
    let call = calls.recv().await.expect("call");
    assert_eq!(call.route, "tag 1-0");
    let _ = call.reply.send(Reply::Tag(true));

    let outcome = task.await.expect("join").expect("mutation");
    assert!(matches!(
        outcome.resolution,
        Resolution::Confirmed { changed: false, .. }
    ));
    assert!(client.tag_vocabulary().await.is_empty());
}

#[tokio::test]
async fn invalid_input_never_reaches_backend() {
    let (client, mut calls) = loaded_client().await;

    let err = client
        .set_rank_input(CompanyId(1), "three")
        .await
        .expect_err("malformed");
    assert!(matches!(err, DirectoryError::Validation(_)));

    let err = client
        .add_tag(CompanyId(2), "   ")
        .await
        .expect_err("blank tag");
    assert!(matches!(err, DirectoryError::Validation(_)));

    let err = client
        .set_tier_input(CompanyId(2), "E")
        .await
        .expect_err("bad tier");
    assert!(matches!(err, DirectoryError::Validation(_)));

    let err = client
        .remove_tag(CompanyId(2), 0)
        .await
        .expect_err("no tags");
    assert!(matches!(err, DirectoryError::Validation(_)));

    let err = client.upvote(CompanyId(42)).await.expect_err("missing");
    assert_eq!(err, DirectoryError::NotFound(CompanyId(42)));

    assert!(calls.try_recv().is_err());
    assert_eq!(rank_of(&client, 1).await, 3);
}

#[tokio::test]
async fn rank_input_is_trimmed_and_parsed() {
    let (client, mut calls) = loaded_client().await;
    let task = spawn_mutation(&client, |c| async move { c.set_rank_input(CompanyId(2), " 7 ").await });
    let call = calls.recv().await.expect("call");
    assert_eq!(call.route, "rank 2=7");
    let _ = call.reply.send(Reply::Rank(7));
    task.await.expect("join").expect("mutation");
    assert_eq!(rank_of(&client, 2).await, 7);
}

#[tokio::test]
async fn overlapping_tag_adds_keep_the_accepted_tag() {
    let (client, mut calls) = loaded_client().await;
    let first = spawn_mutation(&client, |c| async move { c.add_tag(CompanyId(1), "x").await });
    let first_call = calls.recv().await.expect("first call");
    let second = spawn_mutation(&client, |c| async move { c.add_tag(CompanyId(1), "y").await });
    let second_call = calls.recv().await.expect("second call");
    assert_eq!(second_call.route, "tag 1+y");

    let _ = first_call.reply.send(Reply::Tag(true));
    let first_outcome = first.await.expect("join").expect("first");
    assert_eq!(first_outcome.resolution, Resolution::Superseded);

    let _ = second_call.reply.send(Reply::Fail("connection reset".into()));
    let second_outcome = second.await.expect("join").expect("second");
    match second_outcome.resolution {
        Resolution::RolledBack { company, .. } => assert_eq!(company.tags, vec!["ai", "x"]),
        other => panic!("unexpected resolution: {other:?}"),
    }
    assert_eq!(
        client.company(CompanyId(1)).await.expect("company").tags,
        vec!["ai", "x"]
    );
}

#[tokio::test(start_paused = true)]
async fn dropped_mutation_rolls_back_and_releases_field() {
    let (client, mut calls) = loaded_client().await;
    let mut events = client.subscribe_events();

    let attempt = timeout(Duration::from_millis(50), client.set_rank(CompanyId(1), 5)).await;
    assert!(attempt.is_err());
    let _unanswered = calls.recv().await.expect("call");

    assert_eq!(rank_of(&client, 1).await, 3);
    assert_eq!(
        client.store.lock().await.field_state(CompanyId(1), Field::Rank),
        FieldState::Idle
    );
    assert!(client.has_error_flag(CompanyId(1)).await);

    let mut rolled_back = false;
    while let Ok(event) = events.try_recv() {
        if let DirectoryEvent::MutationRolledBack { company, field, .. } = event {
            assert_eq!(company.rank, 3);
            assert_eq!(field, Field::Rank);
            rolled_back = true;
        }
    }
    assert!(rolled_back);
}

#[tokio::test(start_paused = true)]
async fn success_after_failure_announces_cleared_flag() {
    let (client, mut calls) = loaded_client().await;
    let mut events = client.subscribe_events();

    let failing = spawn_mutation(&client, |c| async move { c.set_tier(CompanyId(1), Tier::A).await });
    let call = calls.recv().await.expect("tier call");
    let _ = call.reply.send(Reply::Fail("request timed out".into()));
    failing.await.expect("join").expect("tier");
    assert!(client.has_error_flag(CompanyId(1)).await);

    let retry = spawn_mutation(&client, |c| async move { c.set_rank(CompanyId(1), 3).await });
    let call = calls.recv().await.expect("rank call");
    let _ = call.reply.send(Reply::Rank(3));
    let outcome = retry.await.expect("join").expect("rank");
    assert!(matches!(
        outcome.resolution,
        Resolution::Confirmed { changed: false, .. }
    ));
    assert!(!client.has_error_flag(CompanyId(1)).await);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen
        .iter()
        .any(|event| matches!(event, DirectoryEvent::ErrorFlagCleared(id) if *id == CompanyId(1))));
}
