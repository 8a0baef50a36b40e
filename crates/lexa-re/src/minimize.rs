//! DFA state minimization by partition refinement.

use std::collections::{HashMap, VecDeque};

use bit_set::BitSet;
use log::{debug, trace};

use crate::dfa::{Dfa, DfaState, DfaStateId};
use crate::nfa::AcceptTag;

type Block = u32;

// states from which no accepting state can be reached
fn live_states(dfa: &Dfa) -> BitSet {
    let mut predecessors: Vec<Vec<DfaStateId>> = vec![Vec::new(); dfa.num_states()];
    for id in dfa.state_ids() {
        for next in dfa.states[id].next.iter().flatten() {
            predecessors[next.index()].push(id);
        }
    }

    let mut live = BitSet::with_capacity(dfa.num_states());
    let mut queue: VecDeque<DfaStateId> = dfa.state_ids().filter(|s| dfa.accept(*s).is_some()).collect();
    while let Some(q) = queue.pop_front() {
        if live.insert(q.index()) {
            queue.extend(predecessors[q.index()].iter().copied());
        }
    }
    live
}

/// Moore-style minimization.
///
/// States that cannot reach an accepting state are folded into the implicit
/// dead state first, then blocks start out as "same accept tag" and are split
/// until every member of a block agrees on the successor block for every
/// class. The result is numbered breadth-first from the start states.
pub fn minimize(dfa: &Dfa) -> Dfa {
    let live = live_states(dfa);
    let keep = |s: DfaStateId| live.contains(s.index()) || dfa.starts().contains(&s);
    let kept: Vec<DfaStateId> = dfa.state_ids().filter(|s| keep(*s)).collect();

    let successor = |s: DfaStateId, class: usize| dfa.states[s].next[class].filter(|t| live.contains(t.index()));

    // initial blocks: one per distinct accept tag, in order of first appearance
    let mut block: Vec<Block> = vec![Block::MAX; dfa.num_states()];
    let mut by_tag: HashMap<Option<AcceptTag>, Block> = HashMap::new();
    for &s in &kept {
        let next_id = by_tag.len() as Block;
        block[s.index()] = *by_tag.entry(dfa.accept(s)).or_insert(next_id);
    }
    let mut num_blocks = by_tag.len();

    let mut round = 0;
    loop {
        let mut by_signature: HashMap<(Block, Vec<Option<Block>>), Block> = HashMap::new();
        let mut refined: Vec<Block> = vec![Block::MAX; dfa.num_states()];
        for &s in &kept {
            let successors: Vec<Option<Block>> = (0..dfa.num_classes())
                .map(|class| successor(s, class).map(|t| block[t.index()]))
                .collect();
            let next_id = by_signature.len() as Block;
            refined[s.index()] = *by_signature.entry((block[s.index()], successors)).or_insert(next_id);
        }

        round += 1;
        trace!("refinement round {}: {} -> {} blocks", round, num_blocks, by_signature.len());
        block = refined;
        // refinement only ever splits, so an unchanged count means a fixed point
        if by_signature.len() == num_blocks {
            break;
        }
        num_blocks = by_signature.len();
    }

    // renumber blocks breadth-first from the starts
    let mut renumbered: Vec<Option<DfaStateId>> = vec![None; num_blocks];
    let mut representatives: Vec<DfaStateId> = Vec::with_capacity(num_blocks);
    let mut queue: VecDeque<DfaStateId> = VecDeque::new();
    let mut visit = |s: DfaStateId, queue: &mut VecDeque<DfaStateId>| {
        let b = block[s.index()] as usize;
        if let Some(id) = renumbered[b] {
            return id;
        }
        let id = DfaStateId::new(representatives.len());
        renumbered[b] = Some(id);
        representatives.push(s);
        queue.push_back(s);
        id
    };

    let starts: Vec<DfaStateId> = dfa.starts().iter().map(|&s| visit(s, &mut queue)).collect();
    let mut states: Vec<DfaState> = Vec::with_capacity(num_blocks);
    while let Some(s) = queue.pop_front() {
        let next = (0..dfa.num_classes())
            .map(|class| successor(s, class).map(|t| visit(t, &mut queue)))
            .collect();
        states.push(DfaState { next, accept: dfa.accept(s) });
    }

    assert_eq!(states.len(), num_blocks, "every block must be reachable from a start state");
    debug!("minimized {} states to {} in {} rounds", dfa.num_states(), states.len(), round);
    Dfa {
        states,
        starts,
        num_classes: dfa.num_classes(),
        bol: dfa.bol_class(),
        eol: dfa.eol_class(),
    }
}
