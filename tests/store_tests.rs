//! 文档存储测试：条件写入、原子批次与订阅，以及对局服务在其上的串行化。

use std::sync::Arc;
use word_mines::board::Position;
use word_mines::config::MatchmakingConfig;
use word_mines::matchmaker::session_key;
use word_mines::session::MoveKind;
use word_mines::store::{Expect, StoreError, WriteBatch, load_json};
use word_mines::{
    DocumentStore, DurationClass, Error, GameRules, GameSession, JoinOutcome, Matchmaker,
    MemoryStore, Placement, RedisStore, SessionService, TurnError, WordList,
};

async fn exercise_store(store: &dyn DocumentStore, prefix: &str) {
    let key = format!("{}doc", prefix);
    let other = format!("{}other", prefix);

    let written = store
        .commit(WriteBatch::new().put_json(&key, &vec![1, 2, 3], Expect::Absent).unwrap())
        .await
        .unwrap();
    assert_eq!(written[0].version, 1);

    // Absent 前置条件在文档存在时失败
    let err = store
        .commit(WriteBatch::new().put(&key, "[]".into(), Expect::Absent))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    // 批次中一个前置条件失败，其他写入也不生效
    let batch = WriteBatch::new()
        .put(&other, "1".into(), Expect::Any)
        .put(&key, "[]".into(), Expect::Version(99));
    assert!(store.commit(batch).await.is_err());
    assert!(store.get(&other).await.unwrap().is_none());

    let (value, version) = load_json::<Vec<i32>>(store, &key).await.unwrap().unwrap();
    assert_eq!((value, version), (vec![1, 2, 3], 1));

    store
        .commit(WriteBatch::new().delete(&key, Expect::Version(1)))
        .await
        .unwrap();
    assert!(store.get(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn memory_store_honours_preconditions() {
    exercise_store(&MemoryStore::new(), "").await;
}

#[tokio::test]
#[ignore = "需要本地 Redis，设置 REDIS_URL 后运行"]
async fn redis_store_honours_preconditions() {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let store = RedisStore::new(&url).await.unwrap();
    let prefix = format!("test-{}:", uuid::Uuid::new_v4());
    exercise_store(&store, &prefix).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_increments_never_lose_updates() {
    let store = Arc::new(MemoryStore::new());
    store
        .commit(WriteBatch::new().put_json("counter", &0u32, Expect::Absent).unwrap())
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                loop {
                    let (value, version) = load_json::<u32>(store.as_ref(), "counter")
                        .await
                        .unwrap()
                        .unwrap();
                    let batch = WriteBatch::new()
                        .put_json("counter", &(value + 1), Expect::Version(version))
                        .unwrap();
                    match store.commit(batch).await {
                        Ok(_) => break,
                        Err(StoreError::Conflict(_)) => continue,
                        Err(e) => panic!("unexpected store error: {}", e),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let (value, version) = load_json::<u32>(store.as_ref(), "counter").await.unwrap().unwrap();
    assert_eq!(value, 8);
    assert_eq!(version, 9);
}

// =============================================================================
// 对局服务
// =============================================================================

fn service_on(store: Arc<dyn DocumentStore>, config: MatchmakingConfig) -> Arc<SessionService> {
    let mm = Matchmaker::new(store.clone(), GameRules::without_hazards(), config, 16);
    let lexicon = Arc::new(|_: &str| true);
    Arc::new(SessionService::new(store, mm, lexicon, 16))
}

fn seeded_config() -> MatchmakingConfig {
    MatchmakingConfig {
        seed: Some(11),
        ..MatchmakingConfig::default()
    }
}

async fn matched_service() -> (Arc<SessionService>, String) {
    matched_service_with(seeded_config()).await
}

async fn matched_service_with(config: MatchmakingConfig) -> (Arc<SessionService>, String) {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let service = service_on(store, config);

    service
        .join_queue(&"alice".to_string(), DurationClass::FiveMinutes)
        .await
        .unwrap();
    let outcome = service
        .join_queue(&"bob".to_string(), DurationClass::FiveMinutes)
        .await
        .unwrap();
    let JoinOutcome::Matched { session_id, .. } = outcome else {
        panic!("expected a match");
    };
    (service, session_id)
}

#[tokio::test]
async fn service_publishes_every_accepted_action() {
    let (service, session_id) = matched_service().await;
    let mut updates = service.subscribe(&session_id);

    let session = service.get_session(&session_id).await.unwrap();
    let owner = session.turn_owner.clone();
    let other = session.opponent_of(&owner).unwrap().clone();

    // 不是自己的回合：拒绝且不推送
    let err = service.pass(&session_id, &other).await.unwrap_err();
    assert!(matches!(err, Error::Turn(TurnError::NotYourTurn)));

    let record = service.pass(&session_id, &owner).await.unwrap();
    assert_eq!(record.kind, MoveKind::Pass);

    let pushed = updates.recv().await.unwrap();
    let pushed: GameSession = pushed.decode().unwrap();
    assert_eq!(pushed.turn_owner, other);
    assert_eq!(pushed.history.len(), 1);

    let snapshot = service.get_session_state(&session_id, &other).await.unwrap();
    assert_eq!(snapshot.digest, pushed.digest());
    assert!(service.get_session_state(&session_id, &"mallory".to_string()).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_are_serialized() {
    let (service, session_id) = matched_service().await;
    let session = service.get_session(&session_id).await.unwrap();
    let owner = session.turn_owner.clone();
    let rack = session.rack(&owner).unwrap().clone();

    let attempt = |col: usize| -> Vec<Placement> {
        rack.occupied_indices()
            .into_iter()
            .take(2)
            .enumerate()
            .map(|(i, slot)| {
                let tile = rack.get(slot).unwrap();
                let position = Position::new(7, col + i);
                if tile.is_wildcard() {
                    Placement::wildcard(position, 'E')
                } else {
                    Placement::new(position, tile)
                }
            })
            .collect()
    };

    // 两次都覆盖中心格，只有先到的一次会被接受
    let first = attempt(6);
    let second = attempt(7);
    let a = tokio::spawn({
        let service = service.clone();
        let id = session_id.clone();
        let owner = owner.clone();
        async move { service.submit_move(&id, &owner, &first).await }
    });
    let b = tokio::spawn({
        let service = service.clone();
        let id = session_id.clone();
        let owner = owner.clone();
        async move { service.submit_move(&id, &owner, &second).await }
    });
    let results = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let session = service.get_session(&session_id).await.unwrap();
    assert_eq!(session.history.len(), 1);
    assert_eq!(session.board.occupied_count(), 2);

    let stored = service
        .store()
        .get(&session_key(&session_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.version, 2);
}

#[tokio::test]
async fn sweep_expires_sessions_and_archives_results() {
    let (service, session_id) = matched_service().await;
    assert_eq!(service.active_sessions(), 1);

    let later = chrono::Utc::now() + chrono::Duration::minutes(10);
    assert_eq!(service.sweep(later).await, 1);
    assert_eq!(service.active_sessions(), 0);

    let session = service.get_session(&session_id).await.unwrap();
    assert!(session.is_finished());
    let result = service
        .store()
        .get(&word_mines::service::result_key(&session_id))
        .await
        .unwrap();
    assert!(result.is_some());

    let err = service.pass(&session_id, &session.turn_owner).await.unwrap_err();
    assert!(matches!(err, Error::Turn(TurnError::GameAlreadyFinished)));
}

#[tokio::test]
async fn expiry_found_by_an_action_is_committed() {
    // 对局时长为零，建局后任何动作都已超时
    let (service, session_id) = matched_service_with(MatchmakingConfig {
        five_minutes_secs: 0,
        ..seeded_config()
    })
    .await;
    let session = service.get_session(&session_id).await.unwrap();
    let owner = session.turn_owner.clone();

    let err = service.pass(&session_id, &owner).await.unwrap_err();
    assert!(matches!(err, Error::Turn(TurnError::GameAlreadyFinished)));

    // 结束状态已落盘并归档，不会被回滚
    let (stored, _) = load_json::<GameSession>(service.store().as_ref(), &session_key(&session_id))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.is_finished());
    assert!(stored.history.is_empty());
    let result = service
        .store()
        .get(&word_mines::service::result_key(&session_id))
        .await
        .unwrap();
    assert!(result.is_some());
    assert_eq!(service.active_sessions(), 0);
}

#[tokio::test]
async fn sessions_only_read_after_restart_are_still_swept() {
    let (service, session_id) = matched_service().await;
    let store = service.store().clone();
    drop(service);

    // 重启后的新服务没有任何跟踪中的对局
    let restarted = service_on(store, seeded_config());
    assert_eq!(restarted.active_sessions(), 0);

    restarted
        .get_session_state(&session_id, &"alice".to_string())
        .await
        .unwrap();
    assert_eq!(restarted.active_sessions(), 1);

    let later = chrono::Utc::now() + chrono::Duration::minutes(10);
    assert_eq!(restarted.sweep(later).await, 1);
    assert!(restarted.get_session(&session_id).await.unwrap().is_finished());
    assert_eq!(restarted.active_sessions(), 0);
}

#[tokio::test]
async fn unknown_sessions_are_not_found() {
    let (service, _) = matched_service().await;
    let err = service
        .get_session_state("missing", &"alice".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert!(WordList::new().is_empty());
}
