//! Property tests for content hashing and chain verification

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use std::sync::Arc;

use review_ledger::chain::hash::{is_valid_hash, HashEngine};
use review_ledger::chain::{
    ChainBuilder, ChainVerifier, NewReview, ReviewRecord, VerifyMode, GENESIS_SENTINEL,
};
use review_ledger::store::{LedgerStore, MemoryLedgerStore};

fn record_strategy() -> impl Strategy<Value = ReviewRecord> {
    (
        1i64..1_000_000_000,
        "[a-zA-Z0-9 :\n]{1,40}",
        "\\PC{1,80}",
        1i64..=5,
        1i64..1_000_000,
        0i64..4_000_000_000_000,
    )
        .prop_map(|(id, title, text, rating, author, millis)| ReviewRecord {
            id,
            movie_title: title,
            review_text: text,
            rating,
            author_id: author,
            created_at: DateTime::<Utc>::from_timestamp_millis(millis).unwrap(),
            supersedes: None,
        })
}

fn link_strategy() -> impl Strategy<Value = String> {
    prop_oneof![Just(GENESIS_SENTINEL.to_string()), "[0-9a-f]{64}"]
}

proptest! {
    #[test]
    fn prop_hash_is_deterministic(record in record_strategy(), link in link_strategy()) {
        let engine = HashEngine::default();
        let first = engine.content_hash(&record, &link).unwrap();
        let second = engine.content_hash(&record.clone(), &link.clone()).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert!(is_valid_hash(&first));
    }

    #[test]
    fn prop_any_field_change_changes_hash(
        record in record_strategy(),
        link in link_strategy(),
        field in 0usize..7,
    ) {
        let engine = HashEngine::default();
        let original = engine.content_hash(&record, &link).unwrap();

        let mut changed = record.clone();
        let mut changed_link = link.clone();
        match field {
            0 => changed.id += 1,
            1 => changed.movie_title.push('x'),
            2 => changed.review_text.push('x'),
            3 => changed.rating = record.rating % 5 + 1,
            4 => changed.author_id += 1,
            5 => changed.created_at += chrono::Duration::milliseconds(1),
            _ => changed_link = format!("{:0>64}", "1"),
        }
        prop_assume!(changed != record || changed_link != link);

        let mutated = engine.content_hash(&changed, &changed_link).unwrap();
        prop_assert_ne!(original, mutated);
    }

    #[test]
    fn prop_lineage_is_not_hashed(record in record_strategy(), supersedes in 1i64..1000) {
        let engine = HashEngine::default();
        let mut revision = record.clone();
        revision.supersedes = Some(supersedes);
        prop_assert_eq!(
            engine.content_hash(&record, GENESIS_SENTINEL).unwrap(),
            engine.content_hash(&revision, GENESIS_SENTINEL).unwrap()
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_appended_ledger_verifies(ratings in prop::collection::vec(1i64..=5, 0..20)) {
        let store = Arc::new(MemoryLedgerStore::new());
        let builder = ChainBuilder::new(store.clone());
        let verifier = ChainVerifier::new(store.clone());

        let report = tokio_test::block_on(async {
            for (i, rating) in ratings.iter().enumerate() {
                let review = NewReview::new(format!("Film {}", i), "Noted.", *rating, 1);
                builder.append_block(review).await.unwrap();
            }
            verifier.verify_chain(VerifyMode::Exhaustive).await.unwrap()
        });

        prop_assert!(report.valid);
        prop_assert_eq!(report.examined, ratings.len());
        let tail = tokio_test::block_on(store.get_tail()).unwrap();
        prop_assert_eq!(report.head_hash, tail.map(|b| b.content_hash));
    }

    #[test]
    fn prop_single_tamper_is_localized(n in 2usize..12, target in 0usize..12) {
        let target = target % n;
        let store = Arc::new(MemoryLedgerStore::new());
        let builder = ChainBuilder::new(store.clone());
        let verifier = ChainVerifier::new(store.clone());

        let report = tokio_test::block_on(async {
            for i in 0..n {
                let review = NewReview::new(format!("Film {}", i), "Noted.", 3, 1);
                builder.append_block(review).await.unwrap();
            }
            let block = store.get_by_sequence(target as u64).await.unwrap().unwrap();
            let mut record = store.get_record(block.record_id).await.unwrap().unwrap();
            record.review_text.push_str(" (edited)");
            store.overwrite_record(record).await.unwrap();
            verifier.verify_chain(VerifyMode::Exhaustive).await.unwrap()
        });

        prop_assert!(!report.valid);
        prop_assert_eq!(report.breaks.len(), 1);
        prop_assert_eq!(report.breaks[0].sequence_number, target as u64);
        prop_assert_eq!(report.valid_sequences.len(), n - 1);
    }
}
