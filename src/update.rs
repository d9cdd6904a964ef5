//! State update logic (Elm Architecture)

use tracing::{debug, info, trace, warn};

use crate::backend::{NodeDetail, PageReply, StructureDoc, StructureReply};
use crate::command::{Command, TimerKind};
use crate::cursor::{HydrationCursor, PageOutcome};
use crate::error::DiffError;
use crate::message::Message;
use crate::session::{DiffSession, Phase};
use crate::table::NodeTable;
use crate::tree::DiffTree;

/// Apply one message to the session and return the effects to carry out.
pub fn update(session: &mut DiffSession, msg: Message) -> Vec<Command> {
    match msg {
        // === Lifecycle ===
        Message::Start(params) => {
            if session.phase.is_polling() && session.params.as_ref() == Some(&params) {
                debug!(generation = session.generation, "start with active params ignored");
                return Vec::new();
            }
            let commands = session.reset(params);
            info!(generation = session.generation, "diff session started");
            commands
        }

        Message::Refresh => {
            let Some(params) = session.params.clone() else {
                warn!("refresh requested before any diff was started");
                return Vec::new();
            };
            let commands = session.reset(params);
            info!(generation = session.generation, "diff session refreshed");
            commands
        }

        Message::Cancel => {
            let mut commands = Vec::new();
            session.cancel_timers(&mut commands);
            session.generation += 1;
            session.phase = Phase::Cancelled;
            session.tree = None;
            session.table = NodeTable::default();
            session.cursor = None;
            info!(generation = session.generation, "diff session cancelled");
            commands
        }

        // === Timers ===
        Message::Tick { timer, generation } => {
            if generation != session.generation {
                debug!(generation, current = session.generation, ?timer, "tick from old generation");
                return Vec::new();
            }
            match (timer, session.phase) {
                (TimerKind::StructurePoll, Phase::LoadingStructure) => {
                    trace!(generation, "structure poll");
                    let Some(params) = session.params.clone() else {
                        return Vec::new();
                    };
                    vec![session.fetch_structure(&params)]
                }
                (TimerKind::NodePoll, Phase::LoadingNodes) => {
                    trace!(generation, "node poll");
                    session.fetch_next_page().into_iter().collect()
                }
                (timer, phase) => {
                    debug!(?timer, %phase, "tick outside its polling phase");
                    Vec::new()
                }
            }
        }

        // === Backend completions ===
        Message::StructureReceived { generation, reply } => {
            if generation != session.generation || session.phase != Phase::LoadingStructure {
                session.stats.stale_responses += 1;
                debug!(generation, phase = %session.phase, "late structure response dropped");
                return Vec::new();
            }
            match reply {
                Err(err) => {
                    warn!(generation, %err, "structure request failed");
                    session.fail(err)
                }
                Ok(StructureReply::Pending) => {
                    trace!(generation, "structure not ready");
                    Vec::new()
                }
                Ok(StructureReply::Empty) => {
                    info!(generation, "snapshots do not differ");
                    session.finish(Phase::Empty)
                }
                Ok(StructureReply::Ready(doc)) => resolve_structure(session, &doc),
            }
        }

        Message::NodePageReceived {
            generation,
            offset,
            reply,
        } => {
            if generation != session.generation || session.phase != Phase::LoadingNodes {
                session.stats.stale_responses += 1;
                debug!(generation, offset, phase = %session.phase, "late node page dropped");
                return Vec::new();
            }
            match reply {
                Err(err) => {
                    warn!(generation, offset, %err, "node page request failed");
                    session.fail(err)
                }
                Ok(PageReply::Pending) => {
                    trace!(generation, offset, "node page not ready");
                    Vec::new()
                }
                Ok(PageReply::Ready(records)) => merge_page(session, offset, records),
            }
        }
    }
}

fn resolve_structure(session: &mut DiffSession, doc: &StructureDoc) -> Vec<Command> {
    let built = DiffTree::from_document(doc)
        .and_then(|tree| NodeTable::for_structure(doc, &tree).map(|table| (tree, table)));
    let (tree, table) = match built {
        Ok(built) => built,
        Err(err) => {
            warn!(generation = session.generation, %err, "structure rejected");
            return session.fail(err);
        }
    };

    info!(
        generation = session.generation,
        nodes = tree.len(),
        total = ?doc.nodecount,
        "structure resolved"
    );
    let cursor = HydrationCursor::new(session.config.page_size, doc.nodecount);
    let complete = cursor.is_complete();
    session.tree = Some(tree);
    session.table = table;
    session.cursor = Some(cursor);

    if complete {
        return session.finish(Phase::Done);
    }

    let mut commands = vec![Command::CancelTimer(TimerKind::StructurePoll)];
    session.armed.remove(&TimerKind::StructurePoll);
    session.phase = Phase::LoadingNodes;
    commands.extend(session.fetch_next_page());
    session.arm(TimerKind::NodePoll, &mut commands);
    commands
}

fn merge_page(session: &mut DiffSession, offset: usize, records: Vec<NodeDetail>) -> Vec<Command> {
    let Some(cursor) = session.cursor.as_mut() else {
        return Vec::new();
    };
    match cursor.accept_page(&mut session.table, offset, records) {
        PageOutcome::Stale => {
            session.stats.stale_responses += 1;
            debug!(
                generation = session.generation,
                offset,
                expected = cursor.next_offset(),
                "stale node page dropped"
            );
            Vec::new()
        }
        PageOutcome::Merged {
            complete: true,
            accepted,
        } => {
            info!(generation = session.generation, offset, accepted, "hydration complete");
            session.finish(Phase::Done)
        }
        PageOutcome::Merged {
            complete: false,
            accepted,
        } => {
            debug!(generation = session.generation, offset, accepted, "node page merged");
            session.fetch_next_page().into_iter().collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::DiffParams;
    use crate::config::DiffConfig;
    use crate::tree::{NodeKey, Side};

    fn params() -> DiffParams {
        DiffParams::new("Environment", "env-1", 1_000, 2_000)
    }

    fn session(page_size: usize) -> DiffSession {
        DiffSession::new(DiffConfig {
            page_size,
            ..DiffConfig::default()
        })
    }

    fn doc(nodecount: Option<usize>) -> StructureDoc {
        let mut doc = StructureDoc::node(
            "Environment",
            "env-1",
            Side::Both,
            vec![
                StructureDoc::node("Host", "h1", Side::LeftOnly, vec![]),
                StructureDoc::node("Host", "h2", Side::RightOnly, vec![]),
            ],
        );
        doc.nodecount = nodecount;
        doc
    }

    fn started(page_size: usize) -> DiffSession {
        let mut s = session(page_size);
        update(&mut s, Message::Start(params()));
        s
    }

    fn structure(s: &mut DiffSession, doc: StructureDoc) -> Vec<Command> {
        let generation = s.generation();
        update(
            s,
            Message::StructureReceived {
                generation,
                reply: Ok(StructureReply::Ready(doc)),
            },
        )
    }

    fn resolved(page_size: usize, nodecount: Option<usize>) -> DiffSession {
        let mut s = started(page_size);
        structure(&mut s, doc(nodecount));
        s
    }

    fn page(s: &mut DiffSession, offset: usize, n: usize) -> Vec<Command> {
        let generation = s.generation();
        update(
            s,
            Message::NodePageReceived {
                generation,
                offset,
                reply: Ok(PageReply::Ready(vec![NodeDetail::default(); n])),
            },
        )
    }

    #[test]
    fn test_start_fetches_structure_and_arms_timer() {
        let mut s = session(500);
        let commands = update(&mut s, Message::Start(params()));
        assert_eq!(s.phase(), Phase::LoadingStructure);
        assert_eq!(s.generation(), 1);
        assert!(commands.contains(&Command::FetchStructure {
            generation: 1,
            params: params(),
        }));
        assert!(commands.contains(&Command::ArmTimer {
            timer: TimerKind::StructurePoll,
            generation: 1,
            period: Duration::from_millis(3000),
        }));
        assert!(s.is_armed(TimerKind::StructurePoll));
    }

    #[test]
    fn test_start_with_same_params_while_polling_is_noop() {
        let mut s = started(500);
        assert!(update(&mut s, Message::Start(params())).is_empty());
        assert_eq!(s.generation(), 1);

        let other = DiffParams::new("Environment", "env-1", 1_000, 3_000);
        let commands = update(&mut s, Message::Start(other.clone()));
        assert_eq!(s.generation(), 2);
        assert_eq!(s.params(), Some(&other));
        assert!(commands.contains(&Command::CancelTimer(TimerKind::NodePoll)));
    }

    #[test]
    fn test_pending_structure_stays_loading() {
        let mut s = started(500);
        let commands = update(
            &mut s,
            Message::StructureReceived {
                generation: 1,
                reply: Ok(StructureReply::Pending),
            },
        );
        assert!(commands.is_empty());
        assert_eq!(s.phase(), Phase::LoadingStructure);

        let commands = update(
            &mut s,
            Message::Tick {
                timer: TimerKind::StructurePoll,
                generation: 1,
            },
        );
        assert!(matches!(commands.as_slice(), [Command::FetchStructure { .. }]));
        assert_eq!(s.stats().structure_requests, 2);
    }

    #[test]
    fn test_empty_structure_is_terminal_without_page_requests() {
        let mut s = started(500);
        let commands = update(
            &mut s,
            Message::StructureReceived {
                generation: 1,
                reply: Ok(StructureReply::Empty),
            },
        );
        assert_eq!(s.phase(), Phase::Empty);
        assert!(!commands.iter().any(|c| matches!(c, Command::FetchNodePage { .. })));
        assert!(!s.is_armed(TimerKind::StructurePoll));
        assert_eq!(s.stats().page_requests, 0);
    }

    #[test]
    fn test_structure_failure_is_error() {
        let mut s = started(500);
        let commands = update(
            &mut s,
            Message::StructureReceived {
                generation: 1,
                reply: Err(DiffError::RequestFailed("HTTP 500: job error".into())),
            },
        );
        assert_eq!(s.phase(), Phase::Error);
        assert_eq!(
            s.view().last_error(),
            Some(&DiffError::RequestFailed("HTTP 500: job error".into()))
        );
        assert!(commands.contains(&Command::CancelTimer(TimerKind::StructurePoll)));
        assert!(commands.contains(&Command::CancelTimer(TimerKind::NodePoll)));
    }

    #[test]
    fn test_duplicate_identity_is_error() {
        let mut s = started(500);
        let dup = StructureDoc::node(
            "Environment",
            "env-1",
            Side::Both,
            vec![StructureDoc::node("Environment", "env-1", Side::Both, vec![])],
        );
        update(
            &mut s,
            Message::StructureReceived {
                generation: 1,
                reply: Ok(StructureReply::Ready(dup)),
            },
        );
        assert_eq!(s.phase(), Phase::Error);
        assert!(matches!(
            s.view().last_error(),
            Some(DiffError::MalformedStructure(_))
        ));
    }

    #[test]
    fn test_ready_structure_moves_to_loading_nodes() {
        let mut s = started(500);
        let commands = update(
            &mut s,
            Message::StructureReceived {
                generation: 1,
                reply: Ok(StructureReply::Ready(doc(Some(3)))),
            },
        );
        assert_eq!(s.phase(), Phase::LoadingNodes);
        assert!(commands.contains(&Command::CancelTimer(TimerKind::StructurePoll)));
        assert!(commands.contains(&Command::FetchNodePage {
            generation: 1,
            params: params(),
            offset: 0,
            limit: 500,
        }));
        assert!(s.is_armed(TimerKind::NodePoll));
        assert!(!s.is_armed(TimerKind::StructurePoll));
        assert_eq!(s.view().tree().unwrap().len(), 3);
    }

    #[test]
    fn test_zero_nodecount_is_done_immediately() {
        let s = resolved(500, Some(0));
        assert_eq!(s.phase(), Phase::Done);
        assert_eq!(s.stats().page_requests, 0);
        assert!(s.view().tree().is_some());
    }

    #[test]
    fn test_huge_nodecount_starts_paging() {
        let s = resolved(500, Some(usize::MAX / 2));
        assert_eq!(s.phase(), Phase::LoadingNodes);
        assert_eq!(s.table().total(), Some(usize::MAX / 2));
        assert_eq!(s.table().filled(), 0);
        assert_eq!(s.stats().page_requests, 1);
    }

    #[test]
    fn test_node_id_from_previous_tree_has_no_label() {
        let mut s = resolved(500, Some(3));
        let tree = s.view().tree().unwrap();
        let (last, _) = tree.preorder().last().unwrap();
        assert!(s.view().label_of(last).is_some());

        update(&mut s, Message::Refresh);
        let mut small = StructureDoc::node("Environment", "env-1", Side::Both, vec![]);
        small.nodecount = Some(1);
        structure(&mut s, small);

        assert_eq!(s.view().tree().unwrap().len(), 1);
        assert!(s.view().label_of(last).is_none());
    }

    #[test]
    fn test_1200_nodes_take_three_pages() {
        let mut s = resolved(500, Some(1200));
        assert_eq!(s.stats().page_requests, 1);

        let next = page(&mut s, 0, 500);
        assert!(matches!(next.as_slice(), [Command::FetchNodePage { offset: 500, .. }]));
        let next = page(&mut s, 500, 500);
        assert!(matches!(next.as_slice(), [Command::FetchNodePage { offset: 1000, .. }]));
        let done = page(&mut s, 1000, 200);

        assert_eq!(s.phase(), Phase::Done);
        assert_eq!(s.stats().page_requests, 3);
        assert!(done.contains(&Command::CancelTimer(TimerKind::NodePoll)));
        assert_eq!(s.view().progress().filled, 1200);
        assert!(s.view().progress().complete);
    }

    #[test]
    fn test_duplicate_page_is_stale() {
        let mut s = resolved(2, None);
        page(&mut s, 0, 2);
        let commands = page(&mut s, 0, 2);
        assert!(commands.is_empty());
        assert_eq!(s.stats().stale_responses, 1);
        assert_eq!(s.table().filled(), 2);
        assert_eq!(s.phase(), Phase::LoadingNodes);
    }

    #[test]
    fn test_late_page_after_reset_is_discarded() {
        let mut s = resolved(500, Some(1200));
        page(&mut s, 0, 500);
        let old_generation = s.generation();

        update(&mut s, Message::Refresh);
        structure(&mut s, doc(Some(1200)));
        assert_eq!(s.cursor().unwrap().next_offset(), 0);

        let late = Message::NodePageReceived {
            generation: old_generation,
            offset: 500,
            reply: Ok(PageReply::Ready(vec![NodeDetail::default(); 500])),
        };
        assert!(update(&mut s, late).is_empty());
        assert_eq!(s.table().filled(), 0);
        assert_eq!(s.cursor().unwrap().next_offset(), 0);
        assert_eq!(s.phase(), Phase::LoadingNodes);
    }

    #[test]
    fn test_node_poll_refetches_current_offset() {
        let mut s = resolved(2, None);
        page(&mut s, 0, 2);
        let generation = s.generation();
        let commands = update(
            &mut s,
            Message::Tick {
                timer: TimerKind::NodePoll,
                generation,
            },
        );
        assert!(matches!(commands.as_slice(), [Command::FetchNodePage { offset: 2, limit: 2, .. }]));
    }

    #[test]
    fn test_old_generation_tick_is_ignored() {
        let mut s = started(500);
        update(&mut s, Message::Refresh);
        let commands = update(
            &mut s,
            Message::Tick {
                timer: TimerKind::StructurePoll,
                generation: 1,
            },
        );
        assert!(commands.is_empty());
    }

    #[test]
    fn test_page_failure_is_error_and_refresh_recovers() {
        let mut s = resolved(500, None);
        let generation = s.generation();
        update(
            &mut s,
            Message::NodePageReceived {
                generation,
                offset: 0,
                reply: Err(DiffError::RequestFailed("connection reset".into())),
            },
        );
        assert_eq!(s.phase(), Phase::Error);
        assert!(s.view().last_error().unwrap().is_retryable());

        update(&mut s, Message::Refresh);
        assert_eq!(s.phase(), Phase::LoadingStructure);
        assert!(s.view().last_error().is_none());
        assert!(s.view().tree().is_none());
    }

    #[test]
    fn test_cancel_stops_everything() {
        let mut s = resolved(500, None);
        let generation = s.generation();
        let commands = update(&mut s, Message::Cancel);
        assert_eq!(s.phase(), Phase::Cancelled);
        assert!(commands.contains(&Command::CancelTimer(TimerKind::NodePoll)));
        assert!(!s.is_armed(TimerKind::NodePoll));

        let late = Message::NodePageReceived {
            generation,
            offset: 0,
            reply: Ok(PageReply::Ready(vec![NodeDetail::default()])),
        };
        assert!(update(&mut s, late).is_empty());
        assert!(s.view().tree().is_none());
    }

    #[test]
    fn test_refresh_before_start_is_noop() {
        let mut s = session(500);
        assert!(update(&mut s, Message::Refresh).is_empty());
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[test]
    fn test_labels_improve_as_pages_land() {
        let mut s = resolved(500, Some(3));
        let h1 = NodeKey::new("Host", "h1");
        assert_eq!(s.view().label(&h1).unwrap().label, "h1");
        assert!(!s.view().is_loaded(&h1));

        // preorder positions: env-1 = 0, h1 = 1, h2 = 2
        let detail = |name: &str| NodeDetail {
            left: Some(serde_json::from_value(serde_json::json!({"hostname": name})).unwrap()),
            ..NodeDetail::default()
        };
        let generation = s.generation();
        update(
            &mut s,
            Message::NodePageReceived {
                generation,
                offset: 0,
                reply: Ok(PageReply::Ready(vec![
                    NodeDetail::default(),
                    detail("web-1.example"),
                    detail("web-2.example"),
                ])),
            },
        );

        let label = s.view().label(&h1).unwrap();
        assert_eq!(label.label, "web-1.example");
        assert_eq!(label.classification.as_str(), "removed");
        assert!(label.loaded);
        assert_eq!(s.phase(), Phase::Done);
    }
}
