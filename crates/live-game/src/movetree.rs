//! Branching analysis tree built over a finished (or in-progress) game.
//!
//! The historical moves form the main line; user-explored moves hang off it
//! as variations. Nodes live in an arena and are tombstoned on deletion, so
//! `NodeId`s stay stable for the lifetime of an analysis session.

use std::collections::HashSet;

use chess_core::position::LiveBoard;
use chess_core::{replay, MoveRecord};
use shakmaty::{Color, Role, Square};

use crate::error::GameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub struct MoveTreeNode {
    /// SAN label of the move that produced this position; `None` at the root.
    pub san: Option<String>,
    /// Wire squares of that move, used for idempotent insertion.
    pub uci: Option<(Square, Square, Option<Role>)>,
    pub fen: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// A node is main-line iff its parent is and it is the historical
    /// continuation. Variations are never promoted.
    pub is_main_line: bool,
    pub ply: u32,
    pub mover: Option<Color>,
    board: LiveBoard,
    deleted: bool,
}

#[derive(Debug, Clone)]
pub struct MoveTree {
    nodes: Vec<MoveTreeNode>,
    root: NodeId,
    current: NodeId,
}

impl Default for MoveTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MoveTree {
    pub fn new() -> Self {
        let board = LiveBoard::new();
        let root = MoveTreeNode {
            san: None,
            uci: None,
            fen: board.fen(),
            parent: None,
            children: Vec::new(),
            is_main_line: true,
            ply: 0,
            mover: None,
            board,
            deleted: false,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            current: NodeId(0),
        }
    }

    /// Build the main line from SAN moves. Selection starts at the last
    /// historical position, where the analysis board opens.
    pub fn from_san_moves<S: AsRef<str>>(moves: &[S]) -> Result<Self, GameError> {
        let mut tree = Self::new();
        for san in moves {
            let san = san.as_ref();
            let mut board = tree.nodes[tree.current.0].board.clone();
            let applied = board
                .try_san(san)
                .ok_or_else(|| GameError::InvalidSan(san.to_string()))?;
            let id = tree.insert_child(
                tree.current,
                applied.san,
                (applied.from, applied.to, applied.promotion),
                board,
                true,
            );
            tree.current = id;
        }
        Ok(tree)
    }

    /// Build the main line by replaying an authoritative move log.
    pub fn from_log(log: &[MoveRecord]) -> Result<Self, GameError> {
        let snapshot = replay(log)?;
        Self::from_san_moves(&snapshot.san)
    }

    /// Seed a tree from pasted PGN; only the PGN's main line is imported.
    pub fn from_pgn(pgn: &str) -> Result<Self, GameError> {
        Self::from_san_moves(&chess_core::pgn::extract_san_moves(pgn))
    }

    fn insert_child(
        &mut self,
        parent: NodeId,
        san: String,
        uci: (Square, Square, Option<Role>),
        board: LiveBoard,
        is_main_line: bool,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        let ply = self.nodes[parent.0].ply + 1;
        let mover = if ply % 2 == 1 {
            Color::White
        } else {
            Color::Black
        };
        self.nodes.push(MoveTreeNode {
            san: Some(san),
            uci: Some(uci),
            fen: board.fen(),
            parent: Some(parent),
            children: Vec::new(),
            is_main_line: is_main_line && self.nodes[parent.0].is_main_line,
            ply,
            mover: Some(mover),
            board,
            deleted: false,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn current(&self) -> NodeId {
        self.current
    }

    pub fn node(&self, id: NodeId) -> &MoveTreeNode {
        &self.nodes[id.0]
    }

    /// Live (non-deleted) nodes, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| !n.deleted).count()
    }

    pub fn current_fen(&self) -> &str {
        &self.nodes[self.current.0].fen
    }

    fn live_children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes[id.0]
            .children
            .iter()
            .copied()
            .filter(|c| !self.nodes[c.0].deleted)
            .collect()
    }

    /// The continuation child: a main-line child when present, else the
    /// first child in insertion order.
    fn continuation(&self, id: NodeId) -> Option<NodeId> {
        let kids = self.live_children(id);
        kids.iter()
            .copied()
            .find(|c| self.nodes[c.0].is_main_line)
            .or_else(|| kids.first().copied())
    }

    /// Play a move at the selected node. If a matching child already exists,
    /// navigation moves there instead of creating a duplicate. Returns `None`
    /// when the rules engine rejects the move.
    pub fn play(&mut self, from: Square, to: Square, promotion: Option<Role>) -> Option<NodeId> {
        if let Some(existing) = self
            .live_children(self.current)
            .into_iter()
            .find(|c| self.nodes[c.0].uci == Some((from, to, promotion)))
        {
            self.current = existing;
            return Some(existing);
        }

        let mut board = self.nodes[self.current.0].board.clone();
        let applied = board.try_move(from, to, promotion)?;
        let id = self.insert_child(
            self.current,
            applied.san,
            (applied.from, applied.to, applied.promotion),
            board,
            false,
        );
        self.current = id;
        Some(id)
    }

    /// Play by SAN (PGN import path); same idempotence as [`MoveTree::play`].
    pub fn play_san(&mut self, san: &str) -> Option<NodeId> {
        let mut board = self.nodes[self.current.0].board.clone();
        let applied = board.try_san(san)?;
        self.play(applied.from, applied.to, applied.promotion)
    }

    pub fn go_to_start(&mut self) {
        self.current = self.root;
    }

    pub fn go_back(&mut self) {
        if let Some(parent) = self.nodes[self.current.0].parent {
            self.current = parent;
        }
    }

    pub fn go_forward(&mut self) {
        if let Some(next) = self.continuation(self.current) {
            self.current = next;
        }
    }

    pub fn go_to_end(&mut self) {
        while let Some(next) = self.continuation(self.current) {
            self.current = next;
        }
    }

    fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut acc = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            acc.push(n);
            stack.extend(self.live_children(n));
        }
        acc
    }

    /// Delete a variation node and its entire subtree. Deleting the root or
    /// any main-line node is a no-op. If the selection was inside the deleted
    /// subtree it moves to the deleted node's parent.
    pub fn delete(&mut self, id: NodeId) {
        let node = &self.nodes[id.0];
        if node.deleted || node.is_main_line || node.parent.is_none() {
            return;
        }
        let parent = node.parent.unwrap();
        let doomed = self.subtree(id);
        if doomed.contains(&self.current) {
            self.current = parent;
        }
        for n in &doomed {
            self.nodes[n.0].deleted = true;
        }
        self.nodes[parent.0].children.retain(|c| *c != id);
    }

    pub fn delete_current(&mut self) {
        self.delete(self.current);
    }

    /// Discard every variation; selection moves to the main-line leaf.
    pub fn reset_to_main_line(&mut self) {
        for i in 0..self.nodes.len() {
            if !self.nodes[i].is_main_line {
                self.nodes[i].deleted = true;
            }
        }
        for i in 0..self.nodes.len() {
            let kept: Vec<NodeId> = self.nodes[i]
                .children
                .iter()
                .copied()
                .filter(|c| !self.nodes[c.0].deleted)
                .collect();
            self.nodes[i].children = kept;
        }
        self.current = self.main_line_leaf();
    }

    pub fn main_line_leaf(&self) -> NodeId {
        let mut id = self.root;
        loop {
            let next = self
                .live_children(id)
                .into_iter()
                .find(|c| self.nodes[c.0].is_main_line);
            match next {
                Some(n) => id = n,
                None => return id,
            }
        }
    }

    /// FENs from the selected node back to the root, most recent first.
    /// This is the shape the opening-book lookup wants.
    pub fn fens_to_current(&self) -> Vec<String> {
        let mut fens = Vec::new();
        let mut id = Some(self.current);
        while let Some(n) = id {
            fens.push(self.nodes[n.0].fen.clone());
            id = self.nodes[n.0].parent;
        }
        fens
    }

    /// Depth-first movetext: the main continuation runs linearly and later
    /// children render as parenthesized variations. The visited set guards
    /// against revisiting a node during the mutable build-up.
    pub fn render_movetext(&self) -> String {
        let mut out = String::new();
        let mut visited = HashSet::new();
        visited.insert(self.root);
        self.render_line(self.root, &mut out, &mut visited);
        out
    }

    fn render_line(&self, start: NodeId, out: &mut String, visited: &mut HashSet<NodeId>) {
        let mut node = start;
        let mut force_number = false;
        loop {
            let kids = self.live_children(node);
            let Some(main) = self.continuation(node) else {
                break;
            };
            if !visited.insert(main) {
                break;
            }
            self.push_token(out, main, force_number);
            force_number = false;

            for kid in kids.into_iter().filter(|k| *k != main) {
                if !visited.insert(kid) {
                    continue;
                }
                out.push_str(" (");
                self.push_token(out, kid, true);
                self.render_line(kid, out, visited);
                out.push(')');
                force_number = true;
            }
            node = main;
        }
    }

    fn push_token(&self, out: &mut String, id: NodeId, force_number: bool) {
        let node = &self.nodes[id.0];
        let san = node.san.as_deref().unwrap_or_default();
        let move_no = (node.ply + 1) / 2;
        let token = match node.mover {
            Some(Color::White) => format!("{move_no}. {san}"),
            Some(Color::Black) if force_number => format!("{move_no}... {san}"),
            _ => san.to_string(),
        };
        if !out.is_empty() && !out.ends_with('(') {
            out.push(' ');
        }
        out.push_str(&token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(s: &str) -> Square {
        s.parse().unwrap()
    }

    fn italian() -> MoveTree {
        MoveTree::from_san_moves(&["e4", "e5", "Nf3", "Nc6"]).unwrap()
    }

    #[test]
    fn test_main_line_construction() {
        let tree = italian();
        assert_eq!(tree.node_count(), 5);
        let leaf = tree.main_line_leaf();
        assert_eq!(tree.node(leaf).ply, 4);
        assert!(tree.node(leaf).is_main_line);
        assert_eq!(tree.current(), leaf);
    }

    #[test]
    fn test_idempotent_insertion() {
        let mut tree = italian();
        tree.go_to_start();
        // e4 already exists as the historical continuation.
        let id1 = tree.play(sq("e2"), sq("e4"), None).unwrap();
        tree.go_to_start();
        let id2 = tree.play(sq("e2"), sq("e4"), None).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(tree.node_count(), 5);
        assert!(tree.node(id1).is_main_line);
    }

    #[test]
    fn test_variation_never_main_line() {
        let mut tree = italian();
        tree.go_to_start();
        tree.go_forward(); // after 1. e4
        let var = tree.play(sq("c7"), sq("c5"), None).unwrap();
        assert!(!tree.node(var).is_main_line);
        assert_eq!(tree.node(var).san.as_deref(), Some("c5"));
        // A child of a variation is a variation too, wherever it is attached.
        let deeper = tree.play(sq("g1"), sq("f3"), None).unwrap();
        assert!(!tree.node(deeper).is_main_line);
    }

    #[test]
    fn test_illegal_move_rejected() {
        let mut tree = italian();
        tree.go_to_start();
        assert!(tree.play(sq("e2"), sq("e5"), None).is_none());
        assert_eq!(tree.node_count(), 5);
    }

    #[test]
    fn test_navigation() {
        let mut tree = italian();
        tree.go_to_start();
        assert_eq!(tree.node(tree.current()).ply, 0);
        tree.go_forward();
        tree.go_forward();
        assert_eq!(tree.node(tree.current()).ply, 2);
        tree.go_back();
        assert_eq!(tree.node(tree.current()).ply, 1);
        tree.go_to_end();
        assert_eq!(tree.node(tree.current()).ply, 4);
        // go_back at root stays put.
        tree.go_to_start();
        tree.go_back();
        assert_eq!(tree.current(), tree.root());
    }

    #[test]
    fn test_subtree_deletion() {
        let mut tree = italian();
        tree.go_to_start();
        tree.go_forward();
        let var = tree.play(sq("c7"), sq("c5"), None).unwrap();
        tree.play(sq("g1"), sq("f3"), None).unwrap();
        assert_eq!(tree.node_count(), 7);

        tree.delete(var);
        // Both variation plies gone, selection fell back to the parent.
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.node(tree.current()).san.as_deref(), Some("e4"));
        assert!(!tree
            .node(tree.current())
            .children
            .iter()
            .any(|c| *c == var));
    }

    #[test]
    fn test_delete_main_line_is_noop() {
        let mut tree = italian();
        let leaf = tree.main_line_leaf();
        tree.delete(leaf);
        assert_eq!(tree.node_count(), 5);
        tree.go_to_start();
        tree.delete_current();
        assert_eq!(tree.node_count(), 5);
    }

    #[test]
    fn test_reset_to_main_line() {
        let mut tree = italian();
        tree.go_to_start();
        tree.play(sq("d2"), sq("d4"), None).unwrap();
        tree.play(sq("d7"), sq("d5"), None).unwrap();
        assert_eq!(tree.node_count(), 7);

        tree.reset_to_main_line();
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.current(), tree.main_line_leaf());
    }

    #[test]
    fn test_render_movetext_with_variations() {
        let mut tree = italian();
        tree.go_to_start();
        tree.go_forward();
        tree.play(sq("c7"), sq("c5"), None).unwrap();
        let text = tree.render_movetext();
        assert_eq!(text, "1. e4 e5 (1... c5) 2. Nf3 Nc6");
    }

    #[test]
    fn test_render_movetext_white_variation() {
        let mut tree = italian();
        tree.go_to_start();
        tree.go_forward();
        tree.go_forward(); // after 1... e5
        tree.play(sq("f2"), sq("f4"), None).unwrap();
        let text = tree.render_movetext();
        assert_eq!(text, "1. e4 e5 2. Nf3 (2. f4) 2... Nc6");
    }

    #[test]
    fn test_from_pgn_imports_main_line() {
        let pgn = r#"[Event "Casual"]
[TimeControl "5+3"]

1. e4 e5 {fine} 2. Nf3 (2. f4 exf4) 2... Nc6 *"#;
        let tree = MoveTree::from_pgn(pgn).unwrap();
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.render_movetext(), "1. e4 e5 2. Nf3 Nc6");
    }

    #[test]
    fn test_fens_to_current_most_recent_first() {
        let mut tree = italian();
        tree.go_to_start();
        tree.go_forward();
        let fens = tree.fens_to_current();
        assert_eq!(fens.len(), 2);
        assert!(fens[0].contains(" b "));
        assert_eq!(fens[1], chess_core::STARTING_FEN);
    }
}
