mod common;

use common::{spend, state, tx, Backend, BACKENDS, START_TIME};
use futures::future::join_all;
use notary_kernel::result::ConsumedStateType;
use notary_kernel::{NotaryError, TimeWindow, UniquenessResult};
use notary_node::provider::UniquenessProvider;

#[tokio::test]
async fn test_reference_then_input_then_reference() {
    for name in BACKENDS {
        let backend = Backend::new(name);
        let p = &backend.provider;
        let r1 = state(5, 0);

        let read_only = spend(vec![], tx(1)).with_references(vec![r1]);
        assert!(p.commit(read_only).await.unwrap().is_success(), "{}", name);

        // referencing never consumed r1
        assert!(p.commit(spend(vec![r1], tx(2))).await.unwrap().is_success(), "{}", name);

        let late_reader = spend(vec![], tx(3)).with_references(vec![r1]);
        let result = p.commit(late_reader).await.unwrap();
        let details = *result.conflicts().unwrap().get(&r1).unwrap();
        assert_eq!(details.kind, ConsumedStateType::ReferenceInputState, "{}", name);
        assert!(details.cites(&tx(2)), "{}", name);
    }
}

#[tokio::test]
async fn test_spend_conflict_then_replay() {
    for name in BACKENDS {
        let backend = Backend::new(name);
        let p = &backend.provider;
        let s1 = state(6, 0);

        assert!(p.commit(spend(vec![s1], tx(1))).await.unwrap().is_success(), "{}", name);
        let second = p.commit(spend(vec![s1], tx(2))).await.unwrap();
        assert!(second.conflicts().unwrap().get(&s1).unwrap().cites(&tx(1)), "{}", name);
        assert!(p.commit(spend(vec![s1], tx(1))).await.unwrap().is_success(), "{}", name);
    }
}

#[tokio::test]
async fn test_resubmission_with_a_new_input_claims_it() {
    for name in BACKENDS {
        let backend = Backend::new(name);
        let p = &backend.provider;
        let (s1, s2) = (state(7, 0), state(7, 1));

        assert!(p.commit(spend(vec![s1], tx(1))).await.unwrap().is_success(), "{}", name);
        assert!(p.commit(spend(vec![s2], tx(1))).await.unwrap().is_success(), "{}", name);

        let rival = p.commit(spend(vec![s2], tx(2))).await.unwrap();
        assert!(rival.conflicts().unwrap().get(&s2).unwrap().cites(&tx(1)), "{}", name);
    }
}

#[tokio::test]
async fn test_input_double_spend_is_rejected_on_every_backend() {
    for name in BACKENDS {
        let backend = Backend::new(name);
        let p = &backend.provider;

        let a = p.commit(spend(vec![state(1, 0), state(1, 1)], tx(1))).await.unwrap();
        assert_eq!(a, UniquenessResult::Success, "{}", name);

        let b = p.commit(spend(vec![state(1, 0), state(2, 0)], tx(2))).await.unwrap();
        let conflicts = b.conflicts().unwrap_or_else(|| panic!("{}: expected conflict, got {:?}", name, b));
        assert_eq!(conflicts.len(), 1, "{}", name);
        let details = conflicts.get(&state(1, 0)).unwrap();
        assert!(details.cites(&tx(1)), "{}", name);
        assert_eq!(details.kind, ConsumedStateType::InputState);

        // the rejected transaction left no trace on the state it did not conflict on
        let c = p.commit(spend(vec![state(2, 0)], tx(3))).await.unwrap();
        assert!(c.is_success(), "{}: {:?}", name, c);
    }
}

#[tokio::test]
async fn test_consumed_reference_is_a_conflict() {
    for name in BACKENDS {
        let backend = Backend::new(name);
        let p = &backend.provider;

        assert!(p.commit(spend(vec![state(1, 0)], tx(1))).await.unwrap().is_success());

        let reader = spend(vec![state(3, 0)], tx(2)).with_references(vec![state(1, 0)]);
        let result = p.commit(reader).await.unwrap();
        let details = result.conflicts().and_then(|c| c.get(&state(1, 0))).copied();
        let details = details.unwrap_or_else(|| panic!("{}: expected reference conflict, got {:?}", name, result));
        assert_eq!(details.kind, ConsumedStateType::ReferenceInputState, "{}", name);
        assert!(details.cites(&tx(1)));

        // references are never consumed
        let untouched = spend(vec![state(4, 0)], tx(3)).with_references(vec![state(3, 0)]);
        assert!(p.commit(untouched).await.unwrap().is_success(), "{}", name);
        assert!(p.commit(spend(vec![state(3, 0)], tx(4))).await.unwrap().is_success(), "{}", name);
    }
}

#[tokio::test]
async fn test_resubmitting_a_notarised_transaction_succeeds() {
    for name in BACKENDS {
        let backend = Backend::new(name);
        let p = &backend.provider;
        let request = spend(vec![state(1, 0), state(1, 1)], tx(7));

        assert!(p.commit(request.clone()).await.unwrap().is_success(), "{}", name);
        assert!(p.commit(request.clone()).await.unwrap().is_success(), "{}", name);

        // replay wins even with a window that has since closed
        backend.clock.advance(60_000);
        let late = request.with_time_window(TimeWindow::until_only(START_TIME + 1));
        assert!(p.commit(late).await.unwrap().is_success(), "{}", name);
    }
}

#[tokio::test]
async fn test_concurrent_spenders_of_one_state_have_exactly_one_winner() {
    for name in BACKENDS {
        let backend = Backend::new(name);
        let p = &backend.provider;

        let attempts = (10..18).map(|n| p.commit(spend(vec![state(9, 0)], tx(n))));
        let results: Vec<UniquenessResult> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

        let winners: Vec<u32> = (10..18)
            .zip(&results)
            .filter(|(_, r)| r.is_success())
            .map(|(n, _)| n)
            .collect();
        assert_eq!(winners.len(), 1, "{}: {:?}", name, results);

        for result in results.iter().filter(|r| !r.is_success()) {
            let details = result.conflicts().unwrap().get(&state(9, 0)).unwrap();
            assert!(details.cites(&tx(winners[0])), "{}", name);
        }
    }
}

#[tokio::test]
async fn test_time_window_is_checked_against_service_time() {
    for name in BACKENDS {
        let backend = Backend::new(name);
        let p = &backend.provider;

        let expired = spend(vec![state(1, 0)], tx(1)).with_time_window(TimeWindow::until_only(START_TIME - 1));
        match p.commit(expired).await.unwrap() {
            UniquenessResult::Failure(NotaryError::TimeWindowInvalid { current_time, .. }) => {
                assert_eq!(current_time, START_TIME, "{}", name);
            }
            other => panic!("{}: expected time window failure, got {:?}", name, other),
        }

        let early = spend(vec![state(1, 0)], tx(2)).with_time_window(TimeWindow::from_only(START_TIME + 5_000));
        let result = p.commit(early.clone()).await.unwrap();
        assert_eq!(result.outcome(), "time_window_invalid", "{}", name);

        // a failed window leaves the input free
        backend.clock.advance(5_000);
        assert!(p.commit(early).await.unwrap().is_success(), "{}", name);
    }
}

#[tokio::test]
async fn test_disjoint_transactions_do_not_interfere() {
    for name in BACKENDS {
        let backend = Backend::new(name);
        let p = &backend.provider;

        let attempts = (0..6).map(|n| p.commit(spend(vec![state(20 + n, 0), state(20 + n, 1)], tx(100 + n))));
        for result in join_all(attempts).await {
            assert!(result.unwrap().is_success(), "{}", name);
        }

        // the same input twice in one request counts once
        let doubled = spend(vec![state(40, 0), state(40, 0)], tx(200));
        assert!(p.commit(doubled).await.unwrap().is_success(), "{}", name);
        let again = p.commit(spend(vec![state(40, 0)], tx(201))).await.unwrap();
        assert!(again.conflicts().unwrap().get(&state(40, 0)).unwrap().cites(&tx(200)), "{}", name);
    }
}
