//! End-to-end call session flows on the in-memory store

use callmarket::application::{Expiry, ExpirySweeper};
use callmarket::config::Config;
use callmarket::domain::account::{Account, AccountRepository, AccountStatus};
use callmarket::domain::call_request::{
    CallRequestRepository, CallRequestStatus, DeclineReason, EndReason, ExpiryKind,
};
use callmarket::domain::ledger::LedgerRepository;
use callmarket::domain::shared::value_objects::AccountId;
use callmarket::infrastructure::audit::{AuditEventType, AuditQuery};
use callmarket::infrastructure::persistence::MemoryStore;
use callmarket::{DomainError, SessionServices};
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

const CLIENT: AccountId = AccountId::new(1);
const ADVISOR: AccountId = AccountId::new(2);
const OTHER_CLIENT: AccountId = AccountId::new(3);

async fn setup(wallet: Decimal) -> (SessionServices, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    store
        .seed_account(Account::client(CLIENT, "Ravi", wallet))
        .await;
    store
        .seed_account(Account::advisor(ADVISOR, "Asha", dec!(10)))
        .await;
    store
        .seed_account(Account::client(OTHER_CLIENT, "Meera", dec!(100)))
        .await;

    let mut services = SessionServices::build(&Config::default(), store.clone());
    services.start_expiry_worker();
    (services, store)
}

async fn status_of(store: &MemoryStore, id: AccountId) -> AccountStatus {
    store.find_account(id).await.unwrap().unwrap().status
}

#[tokio::test]
async fn test_full_call_is_billed_exactly_once() {
    let (services, store) = setup(dec!(100)).await;
    let facade = &services.facade;

    let request = facade.request_call(CLIENT, ADVISOR, 10).await.unwrap();
    assert_eq!(request.status, CallRequestStatus::Pending);
    assert_eq!(request.total_cost, dec!(100));

    let accepted = facade.accept_call(ADVISOR, request.id).await.unwrap();
    assert_eq!(accepted.status, CallRequestStatus::AdvisorAccepted);
    assert!(accepted.advisor_token.is_some());
    assert!(accepted.client_token.is_some());

    let started = facade.join_call(CLIENT, request.id).await.unwrap();
    assert_eq!(started.status, CallRequestStatus::InProgress);

    // a second join is a lost race, not a second charge
    let again = facade.join_call(CLIENT, request.id).await.unwrap_err();
    assert!(again.is_benign());

    let client = store.find_account(CLIENT).await.unwrap().unwrap();
    let advisor = store.find_account(ADVISOR).await.unwrap().unwrap();
    assert_eq!(client.wallet, dec!(0));
    assert_eq!(advisor.wallet, dec!(100));
    assert_eq!(client.status, AccountStatus::Busy);
    assert_eq!(advisor.status, AccountStatus::Busy);

    let call = services
        .ledger
        .call_for_request(request.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(call.call_total_charge, dec!(100));
    assert_eq!(call.per_minute_charge, dec!(10));

    let debits: Vec<_> = store
        .transactions_for(CLIENT)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.debit > Decimal::ZERO)
        .collect();
    assert_eq!(debits.len(), 1);
    assert_eq!(debits[0].call_id, Some(call.id));

    let ended = facade
        .end_call(CLIENT, request.id, EndReason::Client)
        .await
        .unwrap();
    assert_eq!(ended.status, CallRequestStatus::Completed);
    assert_eq!(status_of(&store, CLIENT).await, AccountStatus::Available);
    assert_eq!(status_of(&store, ADVISOR).await, AccountStatus::Available);

    assert_eq!(facade.reconcile(CLIENT).await.unwrap(), dec!(0));
    assert_eq!(facade.reconcile(ADVISOR).await.unwrap(), dec!(100));
    assert_eq!(facade.timers().active_count().await, 0);
}

#[tokio::test]
async fn test_exact_balance_is_enough() {
    let (services, _store) = setup(dec!(100)).await;
    let request = services
        .facade
        .request_call(CLIENT, ADVISOR, 10)
        .await
        .unwrap();
    services.facade.accept_call(ADVISOR, request.id).await.unwrap();
    assert!(services.facade.join_call(CLIENT, request.id).await.is_ok());
}

#[tokio::test]
async fn test_short_balance_is_rejected_at_request() {
    let (services, store) = setup(dec!(99)).await;

    let err = services
        .facade
        .request_call(CLIENT, ADVISOR, 10)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DomainError::InsufficientBalance {
            required: dec!(100),
            available: dec!(99),
        }
    );
    assert_eq!(err.user_message(), "Insufficient Balance.");
    assert!(store.list_open().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_balance_spent_elsewhere_fails_join_without_writes() {
    let (services, store) = setup(dec!(100)).await;
    store
        .seed_account(Account::advisor(AccountId::new(4), "Kiran", dec!(10)))
        .await;
    let facade = &services.facade;

    let first = facade.request_call(CLIENT, ADVISOR, 10).await.unwrap();
    let second = facade
        .request_call(CLIENT, AccountId::new(4), 10)
        .await
        .unwrap();
    facade.accept_call(ADVISOR, first.id).await.unwrap();
    facade.accept_call(AccountId::new(4), second.id).await.unwrap();

    facade.join_call(CLIENT, first.id).await.unwrap();
    let err = facade.join_call(CLIENT, second.id).await.unwrap_err();
    assert!(matches!(err, DomainError::InsufficientBalance { .. }));

    let stored = facade.get_request(CLIENT, second.id).await.unwrap();
    assert_eq!(stored.status, CallRequestStatus::AdvisorAccepted);
    assert!(services
        .ledger
        .call_for_request(second.id)
        .await
        .unwrap()
        .is_none());
    assert!(store
        .transactions_for(AccountId::new(4))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(facade.reconcile(CLIENT).await.unwrap(), dec!(0));
}

#[tokio::test]
async fn test_busy_advisor_is_unavailable() {
    let (services, _store) = setup(dec!(100)).await;
    let facade = &services.facade;

    let request = facade.request_call(CLIENT, ADVISOR, 5).await.unwrap();
    facade.accept_call(ADVISOR, request.id).await.unwrap();
    facade.join_call(CLIENT, request.id).await.unwrap();

    let err = facade
        .request_call(OTHER_CLIENT, ADVISOR, 5)
        .await
        .unwrap_err();
    assert_eq!(
        err.user_message(),
        "The advisor is currently on another call."
    );
}

#[tokio::test]
async fn test_offline_advisor_is_unavailable() {
    let (services, store) = setup(dec!(100)).await;
    store
        .set_account_status(ADVISOR, AccountStatus::Pending)
        .await
        .unwrap();

    let err = services
        .facade
        .request_call(CLIENT, ADVISOR, 5)
        .await
        .unwrap_err();
    assert_eq!(err.user_message(), "Advisor is not available for calls.");
}

#[tokio::test]
async fn test_parties_are_enforced() {
    let (services, _store) = setup(dec!(100)).await;
    let facade = &services.facade;

    // advisors cannot request calls
    let err = facade.request_call(ADVISOR, ADVISOR, 5).await.unwrap_err();
    assert!(matches!(err, DomainError::Unauthorized(_)));

    let request = facade.request_call(CLIENT, ADVISOR, 5).await.unwrap();

    let err = facade.accept_call(CLIENT, request.id).await.unwrap_err();
    assert!(matches!(err, DomainError::Unauthorized(_)));
    let err = facade.get_request(OTHER_CLIENT, request.id).await.unwrap_err();
    assert!(matches!(err, DomainError::Unauthorized(_)));

    facade.accept_call(ADVISOR, request.id).await.unwrap();
    let err = facade.join_call(ADVISOR, request.id).await.unwrap_err();
    assert!(matches!(err, DomainError::Unauthorized(_)));
    let err = facade.join_call(OTHER_CLIENT, request.id).await.unwrap_err();
    assert!(matches!(err, DomainError::Unauthorized(_)));

    facade.join_call(CLIENT, request.id).await.unwrap();
    let err = facade
        .end_call(CLIENT, request.id, EndReason::Advisor)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ValidationError(_)));

    let err = facade.history(CLIENT, ADVISOR).await.unwrap_err();
    assert!(matches!(err, DomainError::Unauthorized(_)));
}

#[tokio::test]
async fn test_only_the_timer_auto_ends() {
    let (services, store) = setup(dec!(100)).await;
    let facade = &services.facade;

    let request = facade.request_call(CLIENT, ADVISOR, 5).await.unwrap();
    facade.accept_call(ADVISOR, request.id).await.unwrap();
    facade.join_call(CLIENT, request.id).await.unwrap();

    for party in [CLIENT, ADVISOR] {
        let err = facade
            .end_call(party, request.id, EndReason::Auto)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ValidationError(_)));
    }
    let stored = store.find_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CallRequestStatus::InProgress);

    let ended = facade
        .end_call(ADVISOR, request.id, EndReason::Error)
        .await
        .unwrap();
    assert_eq!(ended.end_reason, Some(EndReason::Error));
}

#[tokio::test]
async fn test_repeated_requests_get_distinct_channels() {
    let (services, _store) = setup(dec!(100)).await;
    let mut channels = std::collections::HashSet::new();
    for _ in 0..50 {
        let request = services
            .facade
            .request_call(CLIENT, ADVISOR, 1)
            .await
            .unwrap();
        channels.insert(request.channel_name);
    }
    assert_eq!(channels.len(), 50);
}

#[tokio::test]
async fn test_duration_out_of_bounds() {
    let (services, _store) = setup(dec!(1000)).await;
    for minutes in [0, 61] {
        let err = services
            .facade
            .request_call(CLIENT, ADVISOR, minutes)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ValidationError(_)));
    }
}

#[tokio::test]
async fn test_declines_record_their_reason() {
    let (services, _store) = setup(dec!(100)).await;
    let facade = &services.facade;

    let first = facade.request_call(CLIENT, ADVISOR, 2).await.unwrap();
    let declined = facade.decline_call(ADVISOR, first.id).await.unwrap();
    assert_eq!(declined.status, CallRequestStatus::AdvisorDeclined);
    assert_eq!(declined.decline_reason, Some(DeclineReason::Advisor));

    let second = facade.request_call(CLIENT, ADVISOR, 2).await.unwrap();
    facade.accept_call(ADVISOR, second.id).await.unwrap();
    let declined = facade.decline_after_accept(CLIENT, second.id).await.unwrap();
    assert_eq!(declined.status, CallRequestStatus::Declined);
    assert_eq!(declined.decline_reason, Some(DeclineReason::Client));

    // terminal requests refuse everything
    let err = facade.accept_call(ADVISOR, first.id).await.unwrap_err();
    assert!(err.is_benign());
    assert_eq!(
        err.user_message(),
        "This call request was declined or has expired."
    );
    assert_eq!(facade.timers().active_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_expires() {
    let (services, store) = setup(dec!(100)).await;
    let facade = &services.facade;

    let request = facade.request_call(CLIENT, ADVISOR, 5).await.unwrap();
    assert!(facade
        .timers()
        .is_armed(request.id, ExpiryKind::AcceptWindow)
        .await);

    tokio::time::sleep(Duration::from_secs(21)).await;

    let stored = facade.get_request(CLIENT, request.id).await.unwrap();
    assert_eq!(stored.status, CallRequestStatus::AdvisorDeclined);
    assert_eq!(stored.decline_reason, Some(DeclineReason::Timeout));
    assert!(services
        .ledger
        .call_for_request(request.id)
        .await
        .unwrap()
        .is_none());
    assert_eq!(store.transactions_for(ADVISOR).await.unwrap().len(), 0);

    // the advisor answering late loses
    let err = facade.accept_call(ADVISOR, request.id).await.unwrap_err();
    assert!(err.is_benign());
}

#[tokio::test(start_paused = true)]
async fn test_accepted_request_expires_without_join() {
    let (services, _store) = setup(dec!(100)).await;
    let facade = &services.facade;

    let request = facade.request_call(CLIENT, ADVISOR, 5).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    facade.accept_call(ADVISOR, request.id).await.unwrap();
    assert!(!facade
        .timers()
        .is_armed(request.id, ExpiryKind::AcceptWindow)
        .await);

    // the cancelled accept countdown must not fire at 20s
    tokio::time::sleep(Duration::from_secs(12)).await;
    let stored = facade.get_request(CLIENT, request.id).await.unwrap();
    assert_eq!(stored.status, CallRequestStatus::AdvisorAccepted);

    tokio::time::sleep(Duration::from_secs(4)).await;
    let stored = facade.get_request(CLIENT, request.id).await.unwrap();
    assert_eq!(stored.status, CallRequestStatus::Declined);
    assert_eq!(stored.decline_reason, Some(DeclineReason::Timeout));
}

#[tokio::test(start_paused = true)]
async fn test_call_ends_when_duration_elapses() {
    let (services, store) = setup(dec!(100)).await;
    let facade = &services.facade;

    let request = facade.request_call(CLIENT, ADVISOR, 1).await.unwrap();
    facade.accept_call(ADVISOR, request.id).await.unwrap();
    facade.join_call(CLIENT, request.id).await.unwrap();

    tokio::time::sleep(Duration::from_secs(59)).await;
    let stored = facade.get_request(CLIENT, request.id).await.unwrap();
    assert_eq!(stored.status, CallRequestStatus::InProgress);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let stored = facade.get_request(CLIENT, request.id).await.unwrap();
    assert_eq!(stored.status, CallRequestStatus::Completed);
    assert_eq!(stored.end_reason, Some(EndReason::Auto));

    let call = services
        .ledger
        .call_for_request(request.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(call.remark.as_deref(), Some("Call auto-ended (timer)"));
    assert_eq!(status_of(&store, CLIENT).await, AccountStatus::Available);
    assert_eq!(status_of(&store, ADVISOR).await, AccountStatus::Available);
}

#[tokio::test]
async fn test_stale_expiry_is_absorbed() {
    let (services, _store) = setup(dec!(100)).await;
    let facade = &services.facade;

    let request = facade.request_call(CLIENT, ADVISOR, 5).await.unwrap();
    facade.accept_call(ADVISOR, request.id).await.unwrap();

    let forced = facade
        .expire(Expiry {
            request_id: request.id,
            kind: ExpiryKind::AcceptWindow,
        })
        .await;
    assert!(forced.is_none());

    let stored = facade.get_request(ADVISOR, request.id).await.unwrap();
    assert_eq!(stored.status, CallRequestStatus::AdvisorAccepted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_accept_and_decline_race_has_one_winner() {
    let (services, _store) = setup(dec!(100)).await;

    for _ in 0..20 {
        let request = services
            .facade
            .request_call(CLIENT, ADVISOR, 5)
            .await
            .unwrap();

        let accept = {
            let facade = services.facade.clone();
            tokio::spawn(async move { facade.accept_call(ADVISOR, request.id).await })
        };
        let decline = {
            let facade = services.facade.clone();
            tokio::spawn(async move { facade.decline_call(ADVISOR, request.id).await })
        };
        let accept = accept.await.unwrap();
        let decline = decline.await.unwrap();

        assert!(accept.is_ok() != decline.is_ok());
        let loser = accept.err().or(decline.err()).unwrap();
        assert!(loser.is_benign());

        let stored = services
            .facade
            .get_request(CLIENT, request.id)
            .await
            .unwrap();
        assert!(matches!(
            stored.status,
            CallRequestStatus::AdvisorAccepted | CallRequestStatus::AdvisorDeclined
        ));
        if stored.status == CallRequestStatus::AdvisorDeclined {
            assert!(stored.advisor_token.is_none());
        } else {
            services
                .facade
                .decline_after_accept(CLIENT, request.id)
                .await
                .unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_join_and_join_timeout_race_bills_at_most_once() {
    let (services, store) = setup(dec!(1000)).await;

    for _ in 0..10 {
        let request = services
            .facade
            .request_call(CLIENT, ADVISOR, 1)
            .await
            .unwrap();
        services
            .facade
            .accept_call(ADVISOR, request.id)
            .await
            .unwrap();

        let join = {
            let facade = services.facade.clone();
            tokio::spawn(async move { facade.join_call(CLIENT, request.id).await })
        };
        let timeout = {
            let facade = services.facade.clone();
            tokio::spawn(async move {
                facade
                    .expire(Expiry {
                        request_id: request.id,
                        kind: ExpiryKind::JoinWindow,
                    })
                    .await
            })
        };
        let joined = join.await.unwrap();
        let forced = timeout.await.unwrap();
        assert!(joined.is_ok() != forced.is_some());

        let call = services
            .ledger
            .call_for_request(request.id)
            .await
            .unwrap();
        assert_eq!(call.is_some(), joined.is_ok());
        if joined.is_ok() {
            services
                .facade
                .end_call(CLIENT, request.id, EndReason::Client)
                .await
                .unwrap();
        }
    }

    assert!(services.facade.reconcile(CLIENT).await.is_ok());
    assert!(services.facade.reconcile(ADVISOR).await.is_ok());
    let debits = store
        .transactions_for(CLIENT)
        .await
        .unwrap()
        .iter()
        .filter(|t| t.debit > Decimal::ZERO)
        .count();
    let calls = store
        .transactions_for(ADVISOR)
        .await
        .unwrap()
        .len();
    assert_eq!(debits, calls);
}

#[tokio::test]
async fn test_sweeper_forces_overdue_requests() {
    let config = Config::default();
    let (services, _store) = setup(dec!(100)).await;
    let sweeper = ExpirySweeper::new(services.facade.clone(), &config.session);

    let request = services
        .facade
        .request_call(CLIENT, ADVISOR, 5)
        .await
        .unwrap();

    assert_eq!(sweeper.run_once(Utc::now()).await, 0);
    // inside the grace period
    assert_eq!(
        sweeper
            .run_once(request.created_at + ChronoDuration::seconds(22))
            .await,
        0
    );

    let forced = sweeper
        .run_once(request.created_at + ChronoDuration::seconds(26))
        .await;
    assert_eq!(forced, 1);

    let stored = services
        .facade
        .get_request(CLIENT, request.id)
        .await
        .unwrap();
    assert_eq!(stored.status, CallRequestStatus::AdvisorDeclined);
    assert_eq!(stored.decline_reason, Some(DeclineReason::Timeout));
    assert_eq!(services.facade.timers().active_count().await, 0);
}

#[tokio::test]
async fn test_feeds_follow_the_interest_table() {
    let (services, _store) = setup(dec!(100)).await;
    let facade = &services.facade;

    let mut advisor_feed = facade.subscribe(ADVISOR).await.unwrap();
    let mut client_feed = facade.subscribe(CLIENT).await.unwrap();

    let request = facade.request_call(CLIENT, ADVISOR, 5).await.unwrap();
    let pending = advisor_feed.recv().await.unwrap().unwrap();
    assert_eq!(pending.request_id, request.id);
    assert_eq!(pending.status, CallRequestStatus::Pending);

    facade.accept_call(ADVISOR, request.id).await.unwrap();
    // the client never saw pending
    let accepted = client_feed.recv().await.unwrap().unwrap();
    assert_eq!(accepted.status, CallRequestStatus::AdvisorAccepted);
    let client_token = accepted.token.clone().unwrap();

    facade.join_call(CLIENT, request.id).await.unwrap();
    // the advisor never saw advisor_accepted
    let advisor_started = advisor_feed.recv().await.unwrap().unwrap();
    assert_eq!(advisor_started.status, CallRequestStatus::InProgress);
    let client_started = client_feed.recv().await.unwrap().unwrap();
    assert_eq!(client_started.status, CallRequestStatus::InProgress);

    assert_eq!(client_started.token.unwrap(), client_token);
    assert_ne!(advisor_started.token.unwrap(), client_token);
    assert!(advisor_started.commit > pending.commit);

    facade
        .end_call(ADVISOR, request.id, EndReason::Advisor)
        .await
        .unwrap();
    for feed in [&mut advisor_feed, &mut client_feed] {
        let done = feed.recv().await.unwrap().unwrap();
        assert_eq!(done.status, CallRequestStatus::Completed);
        assert_eq!(done.end_reason, Some(EndReason::Advisor));
    }
}

#[tokio::test]
async fn test_top_up_and_audit_trail() {
    let (services, _store) = setup(dec!(20)).await;
    let facade = &services.facade;

    let entry = facade.top_up(CLIENT, dec!(80), "pay_123").await.unwrap();
    assert_eq!(entry.balance, dec!(100));
    assert_eq!(entry.remark, "Recharge success. Payment ID: pay_123");
    assert!(facade.top_up(CLIENT, dec!(0), "pay_0").await.is_err());
    assert_eq!(facade.reconcile(CLIENT).await.unwrap(), dec!(100));

    let history = facade.history(CLIENT, CLIENT).await.unwrap();
    assert_eq!(history.len(), 2);

    let request = facade.request_call(CLIENT, ADVISOR, 10).await.unwrap();
    facade.accept_call(ADVISOR, request.id).await.unwrap();
    facade.join_call(CLIENT, request.id).await.unwrap();

    let events = services
        .audit
        .query(AuditQuery {
            request_id: Some(request.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e.event_type, AuditEventType::RequestCreated { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e.event_type, AuditEventType::BillingPosted { .. })));
}
