// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Concurrency tests using parking_lot's built-in deadlock detector.
//!
//! The dev build enables `deadlock_detection`, so every mutex inside the
//! engine is tracked. Each test runs a contended workload against the real
//! [`Engine`] while a background thread looks for cycles in the lock graph.

use muffi_ledger::{
    AppointmentId, AppointmentStatus, BookingRequest, CustomBookingRequest, Engine, GrievanceStatus, LedgerConfig,
    LedgerError, NewGrievance, NewService, NewUser, Severity, UserId,
};
use parking_lot::deadlock;
use rayon::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

// === Detector ===

struct Detector {
    running: Arc<AtomicBool>,
    found: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

/// Starts a background thread that checks for deadlocks every 50ms.
fn start_deadlock_detector() -> Detector {
    let running = Arc::new(AtomicBool::new(true));
    let found = Arc::new(AtomicBool::new(false));
    let (running_clone, found_clone) = (running.clone(), found.clone());

    let handle = thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(50));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                found_clone.store(true, Ordering::SeqCst);
                return;
            }
        }
    });

    Detector {
        running,
        found,
        handle,
    }
}

/// Stops the detector and fails the test if it saw a cycle.
fn stop_deadlock_detector(detector: Detector) {
    detector.running.store(false, Ordering::SeqCst);
    detector.handle.join().unwrap();
    assert!(
        !detector.found.load(Ordering::SeqCst),
        "Deadlock detected! See output above for details."
    );
}

// === Fixtures ===

fn engine() -> Arc<Engine> {
    Arc::new(Engine::with_config(LedgerConfig {
        signup_credits: 0,
        link_bonus: 0,
        ..LedgerConfig::default()
    }))
}

fn signup(engine: &Engine, name: &str, key: &str) -> UserId {
    engine
        .register_user(NewUser {
            name: name.into(),
            email: format!("{name}@example.com"),
            access_key: key.into(),
        })
        .unwrap()
        .user
        .profile
        .id
}

fn couple(engine: &Engine, n: usize) -> (UserId, UserId) {
    let key = format!("couple-key-{n}");
    (
        signup(engine, &format!("a{n}"), &key),
        signup(engine, &format!("b{n}"), &key),
    )
}

// === Tests ===

/// Two spends of 8 against a balance of 10: exactly one wins.
#[test]
fn concurrent_spends_admit_at_most_one() {
    let detector = start_deadlock_detector();

    for round in 0..200 {
        let engine = engine();
        let user = signup(&engine, &format!("u{round}"), "solo-key-1");
        engine.add_credits(user, 10, "seed", None, None).unwrap();

        let results: Vec<_> = (0..2)
            .into_par_iter()
            .map(|_| engine.spend_credits(user, 8, "race", None, None))
            .collect();

        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1, "round {round}: {results:?}");
        assert!(results.iter().any(|r| matches!(
            r,
            Err(LedgerError::InsufficientFunds { balance: 2, required: 8 })
        )));
        assert_eq!(engine.balance(user).unwrap(), 2);
    }

    stop_deadlock_detector(detector);
}

/// Many threads draining one account never push it below zero.
#[test]
fn hammered_account_never_goes_negative() {
    let detector = start_deadlock_detector();
    let engine = engine();
    let user = signup(&engine, "ada", "solo-key-1");
    engine.add_credits(user, 1_000, "seed", None, None).unwrap();
    let admitted = AtomicU32::new(0);

    (0..2_000).into_par_iter().for_each(|_| {
        if engine.spend_credits(user, 3, "drain", None, None).is_ok() {
            admitted.fetch_add(1, Ordering::Relaxed);
        }
    });

    let admitted = admitted.load(Ordering::Relaxed) as i64;
    assert_eq!(admitted, 333);
    assert_eq!(engine.balance(user).unwrap(), 1_000 - admitted * 3);
    stop_deadlock_detector(detector);
}

/// Opposite-direction transfers between the same pair of accounts.
#[test]
fn opposing_transfers_do_not_deadlock() {
    let detector = start_deadlock_detector();
    let engine = engine();
    let (ada, bob) = couple(&engine, 0);
    engine.add_credits(ada, 500, "seed", None, None).unwrap();
    engine.add_credits(bob, 500, "seed", None, None).unwrap();

    let handles: Vec<_> = [(ada, bob), (bob, ada)]
        .into_iter()
        .map(|(from, to)| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..2_000 {
                    let _ = engine.transfer(from, to, 1, "ping");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = engine.balance(ada).unwrap() + engine.balance(bob).unwrap();
    assert_eq!(total, 1_000);
    stop_deadlock_detector(detector);
}

/// Transfers in a ring touch every account pair from both sides.
#[test]
fn transfer_ring_preserves_total() {
    let detector = start_deadlock_detector();
    let engine = engine();
    let users: Vec<UserId> = (0..8)
        .map(|n| signup(&engine, &format!("ring{n}"), &format!("ring-key-{n}")))
        .collect();
    for user in &users {
        engine.add_credits(*user, 100, "seed", None, None).unwrap();
    }

    (0..4_000usize).into_par_iter().for_each(|i| {
        let from = users[i % users.len()];
        let to = users[(i * 7 + 3) % users.len()];
        if from != to {
            let _ = engine.transfer(from, to, (i % 5 + 1) as i64, "ring");
        }
    });

    let total: i64 = users.iter().map(|u| engine.balance(*u).unwrap()).sum();
    assert_eq!(total, 800);
    assert!(users.iter().all(|u| engine.balance(*u).unwrap() >= 0));
    stop_deadlock_detector(detector);
}

/// Cancel, decline and rating race on the same appointments while the
/// participants also move credits between themselves.
#[test]
fn appointment_flows_race_with_transfers() {
    let detector = start_deadlock_detector();
    let engine = engine();
    let (ada, bob) = couple(&engine, 0);
    engine.add_credits(ada, 10_000, "seed", None, None).unwrap();
    engine.add_credits(bob, 1_000, "seed", None, None).unwrap();

    let ids: Vec<AppointmentId> = (0..200)
        .map(|n| {
            engine
                .book_custom(
                    ada,
                    CustomBookingRequest {
                        service: NewService {
                            title: format!("slot {n}"),
                            description: None,
                            credit_cost: 10,
                        },
                        booking: BookingRequest {
                            date: "2025-03-01".into(),
                            time: "12:00".into(),
                            moodboard_id: None,
                        },
                    },
                )
                .unwrap()
                .appointment
                .id
        })
        .collect();

    let refunds = AtomicU32::new(0);
    ids.par_iter().enumerate().for_each(|(i, id)| {
        match i % 3 {
            0 => {
                let cancel = engine.cancel(ada, *id).is_ok();
                let decline = engine.decline(bob, *id).is_ok();
                refunds.fetch_add(u32::from(cancel) + u32::from(decline), Ordering::Relaxed);
            }
            1 => {
                let _ = engine.accept(bob, *id);
                let _ = engine.complete(ada, *id);
                let _ = engine.rate(ada, *id, (i % 5 + 1) as i64, None);
            }
            _ => {
                let _ = engine.transfer(bob, ada, 1, "tip");
                let _ = engine.transfer(ada, bob, 1, "tip back");
            }
        }
    });

    // Each cancelled appointment refunds exactly once.
    let cancelled = ids
        .iter()
        .filter(|id| {
            engine.appointment(ada, **id).unwrap().status == AppointmentStatus::Cancelled
        })
        .count();
    assert_eq!(refunds.load(Ordering::Relaxed) as usize, cancelled);
    assert!(engine.balance(ada).unwrap() >= 0);
    assert!(engine.balance(bob).unwrap() >= 0);
    stop_deadlock_detector(detector);
}

/// Concurrent grievance resolution applies the impact once.
#[test]
fn racing_resolutions_apply_impact_once() {
    let detector = start_deadlock_detector();
    let engine = engine();
    let (ada, bob) = couple(&engine, 0);
    engine.add_credits(bob, 1_000, "seed", None, None).unwrap();

    let grievance = engine
        .file_grievance(
            ada,
            NewGrievance {
                title: "Late".into(),
                description: "Very late".into(),
                rating: 2,
                severity: Severity::Medium,
            },
        )
        .unwrap();

    let impacts: usize = (0..16)
        .into_par_iter()
        .map(|n| {
            let user = if n % 2 == 0 { ada } else { bob };
            engine
                .update_grievance_status(user, grievance.id, GrievanceStatus::Resolved)
                .map(|update| usize::from(update.impact.is_some()))
                .unwrap_or(0)
        })
        .sum();

    assert_eq!(impacts, 1);
    assert_eq!(engine.balance(bob).unwrap(), 990);
    stop_deadlock_detector(detector);
}

/// Concurrent link attempts on shared keys never link anyone twice.
#[test]
fn concurrent_linking_keeps_partnerships_symmetric() {
    let detector = start_deadlock_detector();
    let engine = engine();
    let waiting: Vec<UserId> = (0..16)
        .map(|n| signup(&engine, &format!("w{n}"), &format!("wait-key-{n}")))
        .collect();

    // Everyone reaches for the next account's key at once.
    waiting.par_iter().enumerate().for_each(|(i, user)| {
        let _ = engine.link_by_access_key(*user, &format!("wait-key-{}", (i + 1) % 16));
    });

    let mut linked = 0;
    for user in &waiting {
        if let Some(partner) = engine.partner_of(*user).unwrap() {
            let back = engine.partner_of(partner.profile.id).unwrap().unwrap();
            assert_eq!(back.profile.id, *user);
            linked += 1;
        }
    }
    assert!(linked >= 2);
    stop_deadlock_detector(detector);
}

/// Two waiting accounts reach for each other's key at the same time.
#[test]
fn crossed_key_links_pick_one_winner() {
    let detector = start_deadlock_detector();

    for round in 0..100 {
        let engine = engine();
        let left_key = format!("left-key-{round}");
        let right_key = format!("right-key-{round}");
        let left = signup(&engine, &format!("l{round}"), &left_key);
        let right = signup(&engine, &format!("r{round}"), &right_key);

        let (a, b) = rayon::join(
            || engine.link_by_access_key(left, &right_key),
            || engine.link_by_access_key(right, &left_key),
        );
        assert_eq!(
            [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(),
            1,
            "round {round}: {a:?} {b:?}"
        );
        assert_eq!(
            engine.partner_of(left).unwrap().map(|p| p.profile.id),
            Some(right)
        );

        // The loser's old key is empty again.
        let vacated = if a.is_ok() { &left_key } else { &right_key };
        let newcomer = engine
            .register_user(NewUser {
                name: format!("n{round}"),
                email: format!("n{round}@example.com"),
                access_key: vacated.clone(),
            })
            .unwrap();
        assert!(newcomer.partner.is_none());
    }

    stop_deadlock_detector(detector);
}
