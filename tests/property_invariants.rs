use std::collections::BTreeMap;

use proptest::prelude::*;

use kitlog::{
    core::store::LedgerStore,
    engine::{InventoryEngine, LedgerError},
    types::{Condition, Fine},
};

#[derive(Debug, Clone)]
enum Action {
    Define { kit: u8, total: u8 },
    Issue { user: u8, kit: u8 },
    Return { user: u8, kit: u8, condition: u8 },
    ReturnGhost { user: u8 },
    BadCondition { user: u8, kit: u8 },
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0u8..6, 1u8..5).prop_map(|(kit, total)| Action::Define { kit, total }),
        (0u8..4, 0u8..6).prop_map(|(user, kit)| Action::Issue { user, kit }),
        (0u8..4, 0u8..6, 0u8..3)
            .prop_map(|(user, kit, condition)| Action::Return { user, kit, condition }),
        (0u8..4).prop_map(|user| Action::ReturnGhost { user }),
        (0u8..4, 0u8..6).prop_map(|(user, kit)| Action::BadCondition { user, kit }),
    ]
}

fn kit_name(kit: u8) -> String {
    format!("Kit {kit}")
}

fn user_name(user: u8) -> String {
    format!("User{user}")
}

fn condition_of(idx: u8) -> Condition {
    match idx % 3 {
        0 => Condition::Good,
        1 => Condition::Wornout,
        _ => Condition::Lost,
    }
}

fn fine_of(condition: Condition) -> Fine {
    match condition {
        Condition::Good => 0,
        Condition::Wornout => 100,
        Condition::Lost => 200,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct ModelKit {
    total: u32,
    available: u32,
    lost: u32,
    wornout: u32,
}

proptest! {
    #[test]
    fn random_sequences_match_model_and_replay(actions in prop::collection::vec(action_strategy(), 1..200)) {
        let mut engine = InventoryEngine::new();
        let mut kits: BTreeMap<String, ModelKit> = BTreeMap::new();
        // Kit name and fine per transaction, in append order.
        let mut txn_kits: Vec<String> = Vec::new();
        let mut fines: Vec<Fine> = Vec::new();

        for action in actions {
            match action {
                Action::Define { kit, total } => {
                    let name = kit_name(kit);
                    let res = engine.define_kit(&name, u32::from(total));
                    if kits.contains_key(&name) {
                        prop_assert_eq!(res.unwrap_err(), LedgerError::DuplicateKit(name));
                    } else {
                        let rec = res.expect("fresh define succeeds");
                        prop_assert_eq!(rec.available, u32::from(total));
                        kits.insert(
                            name,
                            ModelKit {
                                total: u32::from(total),
                                available: u32::from(total),
                                ..ModelKit::default()
                            },
                        );
                    }
                }
                Action::Issue { user, kit } => {
                    let name = kit_name(kit);
                    let res = engine.issue(&user_name(user), &name);
                    match kits.get_mut(&name) {
                        None => {
                            prop_assert_eq!(res.unwrap_err(), LedgerError::UnknownKit(name));
                        }
                        Some(model) if model.available == 0 => {
                            prop_assert_eq!(res.unwrap_err(), LedgerError::NoUnitsAvailable(name));
                        }
                        Some(model) => {
                            let txn = res.expect("issue succeeds");
                            prop_assert_eq!(txn.fine, 0);
                            model.available -= 1;
                            txn_kits.push(name);
                            fines.push(0);
                        }
                    }
                }
                Action::Return { user, kit, condition } => {
                    let name = kit_name(kit);
                    let condition = condition_of(condition);
                    let txn = engine.return_kit(&user_name(user), &name, condition);
                    prop_assert_eq!(txn.fine, fine_of(condition));
                    if let Some(model) = kits.get_mut(&name) {
                        match condition {
                            Condition::Good => model.available += 1,
                            Condition::Wornout => model.wornout += 1,
                            Condition::Lost => model.lost += 1,
                        }
                    }
                    txn_kits.push(name);
                    fines.push(fine_of(condition));
                }
                Action::ReturnGhost { user } => {
                    let txn = engine.return_kit(&user_name(user), "Phantom Kit", Condition::Lost);
                    prop_assert_eq!(txn.fine, 200);
                    txn_kits.push("Phantom Kit".to_string());
                    fines.push(200);
                }
                Action::BadCondition { user, kit } => {
                    let res = engine.return_kit_raw(&user_name(user), &kit_name(kit), "torn");
                    prop_assert!(matches!(res, Err(LedgerError::InvalidCondition(_))));
                }
            }

            // Counters reconcile with the model after every action.
            for (name, model) in &kits {
                let rec = engine.get_kit(name).expect("defined kit present");
                prop_assert_eq!(
                    (rec.total, rec.available, rec.lost, rec.wornout),
                    (model.total, model.available, model.lost, model.wornout)
                );
            }
            prop_assert_eq!(engine.list_transactions().len(), txn_kits.len());
        }

        // Per-kit history matches a full scan of the append-order log.
        let mut names: Vec<String> = kits.keys().cloned().collect();
        names.push("Phantom Kit".to_string());
        for name in &names {
            let expected: Vec<u64> = txn_kits
                .iter()
                .enumerate()
                .filter(|(_, kit)| kit.as_str() == name.as_str())
                .map(|(pos, _)| pos as u64 + 1)
                .collect();
            let got: Vec<u64> = engine.kit_history(name).iter().map(|t| t.id).collect();
            prop_assert_eq!(got, expected);
        }

        // Fines in append order match the model ledger.
        let mut listed = engine.list_transactions();
        listed.sort_by_key(|t| t.id);
        let listed_fines: Vec<Fine> = listed.iter().map(|t| t.fine).collect();
        prop_assert_eq!(listed_fines, fines);

        // Replaying the drained journal into a fresh store reproduces the
        // exact snapshot.
        let ops = engine.drain_pending_ops();
        let mut fresh = LedgerStore::new();
        for op in ops {
            fresh.apply_replayed_op(op).expect("replay");
        }
        prop_assert_eq!(fresh.export_snapshot(), engine.store().export_snapshot());
    }
}
