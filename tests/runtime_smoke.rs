use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use kitlog::{
    engine::InventoryEngine,
    op::StoredOp,
    persist::{OpSink, PersistResult},
    runtime::{
        events::LedgerEvent,
        handle::{spawn_kitlog, AckMode, RuntimeConfig, RuntimeError},
    },
    types::{Condition, OpSeq},
};

struct SlowSink {
    seen: Arc<Mutex<Vec<OpSeq>>>,
    delay: Duration,
}

impl OpSink for SlowSink {
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq> {
        std::thread::sleep(self.delay);
        let mut seen = self.seen.lock().expect("lock");
        for op in ops {
            seen.push(op.seq);
        }
        Ok(ops.last().map(|o| o.seq).unwrap_or(0))
    }
}

#[tokio::test]
async fn runtime_commands_round_trip_and_events_ordered() {
    let handle = spawn_kitlog(InventoryEngine::new(), None, RuntimeConfig::default());
    let mut sub = handle.subscribe();

    let kit = handle.define_kit("Cricket Set", 3).await.expect("define");
    assert_eq!(kit.available, 3);

    let txn = handle.issue("Alice", "Cricket Set").await.expect("issue");
    assert_eq!(txn.fine, 0);

    let txn = handle
        .return_kit("Alice", "Cricket Set", Condition::Wornout)
        .await
        .expect("return");
    assert_eq!(txn.fine, 100);

    let kit = handle
        .get_kit("Cricket Set")
        .await
        .expect("get")
        .expect("record");
    assert_eq!(kit.available, 2);
    assert_eq!(kit.wornout, 1);

    assert_eq!(handle.list_kits().await.expect("kits").len(), 1);
    let txns = handle.list_transactions().await.expect("txns");
    assert_eq!(txns.len(), 2);
    assert_eq!(txns[0].id, 2);
    assert_eq!(handle.kit_history("Cricket Set").await.expect("history").len(), 2);

    let err = handle.issue("Bob", "Phantom Kit").await.unwrap_err();
    assert!(matches!(err, RuntimeError::Ledger(_)));

    let mut seen = Vec::new();
    for _ in 0..8 {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event")
            .expect("recv");
        if !matches!(evt, LedgerEvent::DurableUpTo { .. }) {
            seen.push(evt);
        }
        if seen.len() == 3 {
            break;
        }
    }

    assert_eq!(
        seen[0],
        LedgerEvent::KitDefined {
            id: 1,
            name: "Cricket Set".to_string()
        }
    );
    assert_eq!(
        seen[1],
        LedgerEvent::Issued {
            txn_id: 1,
            kit_name: "Cricket Set".to_string()
        }
    );
    assert_eq!(
        seen[2],
        LedgerEvent::Returned {
            txn_id: 2,
            kit_name: "Cricket Set".to_string(),
            fine: 100
        }
    );

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn durable_ack_waits_for_persistence() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = SlowSink {
        seen: Arc::clone(&seen),
        delay: Duration::from_millis(100),
    };

    let cfg = RuntimeConfig {
        ack_mode: AckMode::Durable,
        ..RuntimeConfig::default()
    };
    let handle = spawn_kitlog(InventoryEngine::new(), Some(Box::new(sink)), cfg);

    handle.define_kit("Cricket Set", 1).await.expect("define");
    // With durable acks the op is on the sink before the call returns.
    assert_eq!(*seen.lock().expect("lock"), vec![1]);

    handle.issue("Alice", "Cricket Set").await.expect("issue");
    assert_eq!(*seen.lock().expect("lock"), vec![1, 2]);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn slow_sink_surfaces_queue_pressure_under_in_memory_ack() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = SlowSink {
        seen: Arc::clone(&seen),
        delay: Duration::from_millis(250),
    };

    let cfg = RuntimeConfig {
        ack_mode: AckMode::InMemory,
        batch_max_ops: 1,
        batch_max_latency_ms: 500,
        persist_queue_bound: 1,
        snapshot_every_ops: 0,
        compact_after_snapshot: false,
    };

    let handle = spawn_kitlog(InventoryEngine::new(), Some(Box::new(sink)), cfg);
    let mut sub = handle.subscribe();

    handle.define_kit("Cricket Set", 64).await.expect("define");

    let mut durable_seen = false;
    for _ in 0..5 {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("recv timeout")
            .expect("recv");
        if matches!(evt, LedgerEvent::DurableUpTo { .. }) {
            durable_seen = true;
            break;
        }
    }
    assert!(durable_seen, "expected DurableUpTo event");

    let mut queue_error_seen = false;
    for _ in 0..12 {
        let r = handle.issue("Alice", "Cricket Set").await;
        if let Err(RuntimeError::Persist(_)) = r {
            queue_error_seen = true;
            break;
        }
    }
    assert!(
        queue_error_seen,
        "expected persistence queue pressure to surface as error"
    );

    handle.shutdown().await.expect("shutdown");
    assert!(!seen.lock().expect("lock").is_empty());
}
