//! Property-based tests for neighbor-reference positioning.
//!
//! Uses proptest to verify:
//! 1. Neighbors computed for a final index resolve back to that index
//!    against the list without the subject.
//! 2. `array_move` keeps every element exactly once.
//! 3. References that no longer exist fall back to appending.
//! 4. Moving a task on a board by computed neighbors reproduces the
//!    intended order and never duplicates or drops a task.

use proptest::prelude::*;

use boardsync::position::{
    apply_task_move, array_move, compute_insert_index, compute_neighbors, container_order,
};
use boardsync_proto::board::{Board, Section, Task};
use boardsync_proto::ids::{ContainerRef, SectionId, TaskId};
use boardsync_proto::intent::MoveIntent;

// --- Strategies ---

/// A list of `1..=max` distinct ids with a subject index and a target
/// index into it.
fn arb_move(max: usize) -> impl Strategy<Value = (Vec<String>, usize, usize)> {
    (1..=max).prop_flat_map(|len| {
        let ids: Vec<String> = (0..len).map(|n| format!("task-{n}")).collect();
        (Just(ids), 0..len, 0..len)
    })
}

fn section(id: &str) -> ContainerRef {
    ContainerRef::Section(SectionId::new(id))
}

/// Board with `a` tasks in section A followed by `b` tasks in section B,
/// interleaved in the flat list.
fn board(a: usize, b: usize) -> Board {
    let mut board = Board::new("board-1");
    board.sections = vec![Section::new("section-a", "A"), Section::new("section-b", "B")];
    for n in 0..a.max(b) {
        if n < a {
            board
                .tasks
                .push(Task::new(format!("task-a{n}"), "a", section("section-a")));
        }
        if n < b {
            board
                .tasks
                .push(Task::new(format!("task-b{n}"), "b", section("section-b")));
        }
    }
    board
}

// --- Properties ---

proptest! {
    #[test]
    fn neighbors_round_trip((ids, from, to) in arb_move(12)) {
        let mut moved = ids.clone();
        array_move(&mut moved, from, to);
        let neighbors = compute_neighbors(&moved, to);

        let mut without = ids;
        let subject = without.remove(from);
        let idx = compute_insert_index::<String, String>(
            &without,
            neighbors.before.as_ref(),
            neighbors.after.as_ref(),
        );
        prop_assert_eq!(idx, to);

        without.insert(idx, subject);
        prop_assert_eq!(without, moved);
    }

    #[test]
    fn array_move_is_a_permutation((ids, from, to) in arb_move(12)) {
        let mut moved = ids.clone();
        array_move(&mut moved, from, to);
        prop_assert_eq!(moved.len(), ids.len());
        prop_assert_eq!(&moved[to], &ids[from]);

        let mut sorted_before = ids;
        let mut sorted_after = moved;
        sorted_before.sort();
        sorted_after.sort();
        prop_assert_eq!(sorted_before, sorted_after);
    }

    #[test]
    fn stale_references_append((ids, _, _) in arb_move(12)) {
        let gone = "task-gone".to_string();
        let idx = compute_insert_index::<String, String>(&ids, Some(&gone), Some(&gone));
        prop_assert_eq!(idx, ids.len());
    }

    #[test]
    fn board_move_reproduces_intended_order(
        a in 1usize..8,
        b in 0usize..8,
        pick in any::<prop::sample::Index>(),
        slot in any::<prop::sample::Index>(),
    ) {
        let mut board = board(a, b);
        let from_order = container_order(&board, &section("section-a"));
        let subject = from_order[pick.index(a)].clone();

        // Intended order of B with the subject inserted at `slot`.
        let mut target_order = container_order(&board, &section("section-b"));
        let at = slot.index(b + 1);
        target_order.insert(at, subject.clone());
        let neighbors = compute_neighbors(&target_order, at);

        let applied = apply_task_move(&mut board, &MoveIntent {
            subject_id: subject.clone(),
            target_container: Some(SectionId::new("section-b")),
            before_id: neighbors.before,
            after_id: neighbors.after,
        });
        prop_assert!(applied);
        prop_assert_eq!(container_order(&board, &section("section-b")), target_order);

        let remaining: Vec<TaskId> = from_order.into_iter().filter(|id| *id != subject).collect();
        prop_assert_eq!(container_order(&board, &section("section-a")), remaining);
        prop_assert_eq!(board.tasks.len(), a + b);
    }
}
