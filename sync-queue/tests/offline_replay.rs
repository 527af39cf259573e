//! End-to-end: offline writes replayed through the queue into a ledger

use split_ledger::{
    Config, ExpenseId, GroupId, Ledger, MemberId, NewExpense, NewGroup, NewMember, NewSettlement,
    SettlementId, SyncRequest, UserId,
};
use std::sync::Arc;
use sync_queue::{
    LocalTransport, NewQueueItem, OfflineQueue, PassOutcome, QueueConfig, QueueStatus,
    SyncCoordinator, SyncState, SyncTransport,
};
use tempfile::TempDir;

struct Client {
    ledger: Ledger,
    coordinator: SyncCoordinator,
    transport: Arc<LocalTransport>,
    group: GroupId,
    owner: UserId,
    members: Vec<MemberId>,
    _server_dir: TempDir,
    _client_dir: TempDir,
}

/// Group {A (owner), B, C} and an offline client acting as A
fn client() -> Client {
    let server_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.data_dir = server_dir.path().to_path_buf();
    let ledger = Ledger::open(config).unwrap();

    let owner = ledger.register_user("a@example.com", "A").unwrap();
    let group = ledger
        .create_group(
            owner.id,
            NewGroup {
                name: "Trip".to_string(),
                description: None,
                currency: "EUR".to_string(),
            },
        )
        .unwrap();
    for name in ["B", "C"] {
        ledger
            .add_member(
                owner.id,
                group.id,
                NewMember {
                    name: name.to_string(),
                    email: None,
                },
            )
            .unwrap();
    }
    let members = ledger
        .list_members(owner.id, group.id)
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();

    let client_dir = TempDir::new().unwrap();
    let queue = OfflineQueue::open(QueueConfig {
        data_dir: client_dir.path().to_path_buf(),
        ..QueueConfig::default()
    })
    .unwrap();
    let transport = Arc::new(LocalTransport::new(ledger.reconciler(), owner.id));
    let coordinator = SyncCoordinator::new(Arc::new(queue), transport.clone()).unwrap();

    Client {
        ledger,
        coordinator,
        transport,
        group: group.id,
        owner: owner.id,
        members,
        _server_dir: server_dir,
        _client_dir: client_dir,
    }
}

impl Client {
    fn expense(&self, amount: i64) -> NewExpense {
        NewExpense {
            description: "Dinner".to_string(),
            amount,
            paid_by: self.members[0].to_string(),
            split_among: self.members.iter().map(|m| m.to_string()).collect(),
            category: Some("food".to_string()),
            date: "2024-08-01".to_string(),
        }
    }

    fn net(&self) -> Vec<i64> {
        self.ledger
            .balances(self.owner, self.group)
            .unwrap()
            .iter()
            .map(|b| b.net_balance)
            .collect()
    }
}

#[tokio::test]
async fn test_offline_writes_reach_the_ledger() {
    let c = client();

    let expense_id = ExpenseId::new();
    c.coordinator
        .enqueue(NewQueueItem::create_expense(expense_id, c.group, &c.expense(900)).unwrap())
        .unwrap();
    c.coordinator
        .enqueue(
            NewQueueItem::create_settlement(
                SettlementId::new(),
                c.group,
                &NewSettlement {
                    payer: c.members[0].to_string(),
                    payee: c.members[1].to_string(),
                    amount: 300,
                    note: None,
                    date: "2024-08-02".to_string(),
                },
            )
            .unwrap(),
        )
        .unwrap();

    // Nothing reaches the server before a pass
    assert_eq!(c.net(), vec![0, 0, 0]);

    let outcome = c.coordinator.sync_now().await.unwrap();
    let PassOutcome::Completed(report) = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(report.applied, 2);
    assert_eq!(report.failed, 0);
    assert!(report.server_time.is_some());
    assert!(c.coordinator.clock_offset().is_some());

    // A paid 900 for three and then paid B 300
    assert_eq!(c.net(), vec![900, -600, -300]);
    assert!(c.coordinator.queue().items().unwrap().is_empty());
    assert_eq!(c.coordinator.state(), SyncState::Idle);
    assert_eq!(*c.coordinator.pending_count().borrow(), 0);

    let stored = c.ledger.get_expense(c.owner, c.group, expense_id).unwrap();
    assert_eq!(stored.amount, 900);
    assert!(stored.temp_id.is_some());
}

#[tokio::test]
async fn test_lost_acknowledgement_is_replayed_once() {
    let c = client();
    c.coordinator
        .enqueue(NewQueueItem::create_expense(ExpenseId::new(), c.group, &c.expense(600)).unwrap())
        .unwrap();

    // Server applies the batch but the client never records the outcome
    let batch = c.coordinator.queue().pending_batch(50).unwrap();
    let request = SyncRequest {
        operations: batch.iter().map(|item| item.to_operation()).collect(),
    };
    let response = c.transport.push(request).await.unwrap();
    assert_eq!(response.applied.len(), 1);
    assert_eq!(c.net(), vec![400, -200, -200]);

    let outcome = c.coordinator.sync_now().await.unwrap();
    assert!(matches!(outcome, PassOutcome::Completed(ref r) if r.applied == 1));
    assert_eq!(c.net(), vec![400, -200, -200]);
    assert!(c.coordinator.queue().items().unwrap().is_empty());
}

#[tokio::test]
async fn test_offline_create_then_delete() {
    let c = client();
    let id = ExpenseId::new();
    c.coordinator
        .enqueue(NewQueueItem::create_expense(id, c.group, &c.expense(300)).unwrap())
        .unwrap();
    c.coordinator
        .enqueue(NewQueueItem::delete_expense(id, c.group))
        .unwrap();

    c.coordinator.sync_now().await.unwrap();
    assert_eq!(c.net(), vec![0, 0, 0]);
    assert!(c.ledger.get_expense(c.owner, c.group, id).is_err());
}

#[tokio::test]
async fn test_rejected_item_is_retried_then_dead_lettered() {
    let c = client();
    c.coordinator
        .enqueue(NewQueueItem::create_expense(ExpenseId::new(), c.group, &c.expense(0)).unwrap())
        .unwrap();
    c.coordinator
        .enqueue(NewQueueItem::create_expense(ExpenseId::new(), c.group, &c.expense(30)).unwrap())
        .unwrap();

    let outcome = c.coordinator.sync_now().await.unwrap();
    let PassOutcome::Completed(report) = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(report.applied, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(c.net(), vec![20, -10, -10]);

    let item = &c.coordinator.queue().items().unwrap()[0];
    assert_eq!(item.status, QueueStatus::Failed);
    assert!(item
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("Amount must be positive"));

    for _ in 0..4 {
        c.coordinator.sync_now().await.unwrap();
    }
    let dead = c.coordinator.queue().dead_letters().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].retries, 5);
    assert_eq!(c.coordinator.sync_now().await.unwrap(), PassOutcome::Empty);

    assert_eq!(c.coordinator.queue().clear_failed().unwrap(), 1);
    assert!(c.coordinator.queue().items().unwrap().is_empty());
}
