//! Arena over both trees plus the per-edge cost and bound terms.
//!
//! Both trees are flattened into one arena in pre-order (left tree first), so
//! a node is a plain index and a subtree is a contiguous index range. An
//! [`Edge`] pairs a left index with a right index; either side may be absent
//! ("no match"), never both.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use rayon::prelude::*;
use tracing::warn;

use super::params::CostModelParams;
use crate::error::MatchingsError;
use crate::tree::AstNode;
use crate::types::{Category, ListOrdering, NodeRef};

pub(crate) type Ix = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Edge {
    pub m: Option<Ix>,
    pub n: Option<Ix>,
}

impl Edge {
    pub fn new(m: Option<Ix>, n: Option<Ix>) -> Self {
        Self { m, n }
    }

    pub fn is_no_match(&self) -> bool {
        self.m.is_none() || self.n.is_none()
    }

    /// The partner of `x` in this edge; `None` for a no-match edge.
    pub fn other(&self, x: Ix) -> Option<Ix> {
        if self.m == Some(x) { self.n } else { self.m }
    }
}

pub(crate) struct TreeArena<'a> {
    pub nodes: Vec<&'a AstNode>,
    pub parent: Vec<Option<Ix>>,
    pub children: Vec<Vec<Ix>>,
    /// Siblings including the node itself; a root is its own only sibling.
    pub siblings: Vec<Vec<Ix>>,
    /// Whether the node's position among its siblings is significant.
    pub ordered: Vec<bool>,
    /// Exclusive end of the node's subtree range.
    pub end: Vec<Ix>,
    pub left_len: usize,
    index: HashMap<NodeRef, Ix>,
}

impl<'a> TreeArena<'a> {
    pub fn new(left: &'a AstNode, right: &'a AstNode) -> Self {
        let mut arena = Self {
            nodes: Vec::new(),
            parent: Vec::new(),
            children: Vec::new(),
            siblings: Vec::new(),
            ordered: Vec::new(),
            end: Vec::new(),
            left_len: 0,
            index: HashMap::new(),
        };
        arena.push(left, None);
        arena.left_len = arena.nodes.len();
        arena.push(right, None);

        arena.siblings = (0..arena.nodes.len())
            .map(|x| match arena.parent[x] {
                Some(p) => arena.children[p].clone(),
                None => vec![x],
            })
            .collect();
        arena.ordered = (0..arena.nodes.len())
            .map(|x| {
                arena.parent[x]
                    .is_some_and(|p| arena.nodes[p].ordering() == ListOrdering::Ordered)
            })
            .collect();
        arena
    }

    fn push(&mut self, node: &'a AstNode, parent: Option<Ix>) -> Ix {
        let ix = self.nodes.len();
        self.nodes.push(node);
        self.parent.push(parent);
        self.children.push(Vec::new());
        self.end.push(ix + 1);
        self.index.insert(node.node_ref(), ix);

        for child in node.children() {
            let c = self.push(child, Some(ix));
            self.children[ix].push(c);
        }
        self.end[ix] = self.nodes.len();
        ix
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_left(&self, x: Ix) -> bool {
        x < self.left_len
    }

    pub fn lookup(&self, node: NodeRef) -> Option<Ix> {
        self.index.get(&node).copied()
    }

    pub fn in_subtree(&self, root: Ix, x: Ix) -> bool {
        root <= x && x < self.end[root]
    }

    pub fn left_nodes(&self) -> std::ops::Range<Ix> {
        0..self.left_len
    }

    pub fn right_nodes(&self) -> std::ops::Range<Ix> {
        self.left_len..self.nodes.len()
    }

    fn other_siblings(&self, x: Ix) -> impl Iterator<Item = Ix> + '_ {
        self.siblings[x].iter().copied().filter(move |&s| s != x)
    }

    fn path_to_root(&self, mut x: Ix) -> Vec<Ix> {
        let mut path = vec![x];
        while let Some(p) = self.parent[x] {
            path.push(p);
            x = p;
        }
        path
    }
}

/// Image of every node under a complete edge set: `None` for nodes no edge
/// covers, `Some(None)` for no-match edges.
pub(crate) struct Images(Vec<Option<Option<Ix>>>);

impl Images {
    pub fn new(arena: &TreeArena<'_>, edges: &[Edge]) -> Self {
        let mut images = vec![None; arena.len()];
        for e in edges {
            if let Some(m) = e.m {
                images[m] = Some(e.n);
            }
            if let Some(n) = e.n {
                images[n] = Some(e.m);
            }
        }
        Self(images)
    }

    pub fn get(&self, arena: &TreeArena<'_>, x: Ix) -> Result<Option<Ix>, MatchingsError> {
        self.0[x].ok_or_else(|| MatchingsError::Uncovered(arena.nodes[x].node_ref()))
    }
}

/// Cost and bound evaluation over one arena. The LCA cache is shared by the
/// parallel per-edge tasks and cleared after every phase.
pub(crate) struct CostGraph<'a> {
    pub arena: TreeArena<'a>,
    params: CostModelParams,
    lca: DashMap<(Ix, Ix), (Ix, Ix)>,
}

impl<'a> CostGraph<'a> {
    pub fn new(left: &'a AstNode, right: &'a AstNode, params: CostModelParams) -> Self {
        Self {
            arena: TreeArena::new(left, right),
            params,
            lca: DashMap::new(),
        }
    }

    /// Per-edge exact costs of a complete edge set, plus their sum normalized
    /// by the total number of nodes.
    pub fn exact_costs(&self, edges: &[Edge]) -> (Vec<f32>, f32) {
        let images = Images::new(&self.arena, edges);
        let eval = |e: &Edge| {
            self.exact_cost(e, &images).unwrap_or_else(|err| {
                warn!(error = %err, "skipping edge in cost evaluation");
                0.0
            })
        };
        let costs: Vec<f32> = if self.params.parallel {
            edges.par_iter().map(eval).collect()
        } else {
            edges.iter().map(eval).collect()
        };
        self.lca.clear();

        let total = costs.iter().map(|&c| c as f64).sum::<f64>() / self.arena.len() as f64;
        (costs, total as f32)
    }

    pub fn exact_cost(&self, e: &Edge, images: &Images) -> Result<f32, MatchingsError> {
        let (Some(m), Some(n)) = (e.m, e.n) else {
            return Ok(self.params.wn);
        };
        let renaming = self.renaming_cost(m, n);
        let ancestry = self.params.wa
            * (self.ancestry_violations(m, n, images)? + self.ancestry_violations(n, m, images)?)
                as f32;
        let breakup =
            self.params.ws * (self.sibling_breakup(m, n, images)? + self.sibling_breakup(n, m, images)?);
        let ordering = if self.ordering_violated(m, n, images)? {
            self.params.wo
        } else {
            0.0
        };
        Ok(renaming + ancestry + breakup + ordering)
    }

    fn renaming_cost(&self, m: Ix, n: Ix) -> f32 {
        let (a, b) = (self.arena.nodes[m], self.arena.nodes[n]);
        if a.matches(b) {
            return 0.0;
        }
        let eased = matches!(
            (a.category(), b.category()),
            (Category::Method, Category::Method) | (Category::Class, Category::Class)
        );
        if eased { 0.1 * self.params.wr } else { self.params.wr }
    }

    /// Children of `m` whose image is matched but not a child of `n`.
    fn ancestry_violations(&self, m: Ix, n: Ix, images: &Images) -> Result<usize, MatchingsError> {
        let mut count = 0;
        for &c in &self.arena.children[m] {
            if let Some(img) = images.get(&self.arena, c)? {
                if !self.arena.children[n].contains(&img) {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// `|D| / (|I| * |F|)` for the siblings of `m`: `I` are siblings whose
    /// image is a sibling of `n`, `D` the other matched siblings and `F` the
    /// distinct parents of the sibling images.
    fn sibling_breakup(&self, m: Ix, n: Ix, images: &Images) -> Result<f32, MatchingsError> {
        let n_siblings = &self.arena.siblings[n];
        let (mut invariant, mut divergent) = (0usize, 0usize);
        let mut families = HashSet::new();

        for &s in &self.arena.siblings[m] {
            if let Some(img) = images.get(&self.arena, s)? {
                families.insert(self.arena.parent[img]);
                if n_siblings.contains(&img) {
                    invariant += 1;
                } else {
                    divergent += 1;
                }
            }
        }

        if divergent == 0 {
            return Ok(0.0);
        }
        Ok(divergent as f32 / (invariant.max(1) * families.len().max(1)) as f32)
    }

    fn ordering_violated(&self, m: Ix, n: Ix, images: &Images) -> Result<bool, MatchingsError> {
        for s in self.arena.other_siblings(m) {
            if let Some(img) = images.get(&self.arena, s)? {
                if self.violates_ordering((s, img), (m, n)) {
                    return Ok(true);
                }
            }
        }
        for s in self.arena.other_siblings(n) {
            if let Some(img) = images.get(&self.arena, s)? {
                if self.violates_ordering((img, s), (m, n)) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Whether the pairs `check` and `edge` (both `(left, right)`) appear in
    /// opposite orders below their lowest common ancestors.
    fn violates_ordering(&self, check: (Ix, Ix), edge: (Ix, Ix)) -> bool {
        let (lx, ly) = self.lca(check.0, edge.0);
        let (rx, ry) = self.lca(check.1, edge.1);
        let left_siblings = &self.arena.siblings[lx];
        let right_siblings = &self.arena.siblings[rx];

        if !left_siblings
            .iter()
            .chain(right_siblings)
            .any(|&x| self.arena.ordered[x])
        {
            return false;
        }

        let pos = |list: &[Ix], x: Ix| list.iter().position(|&s| s == x).map_or(-1, |p| p as i64);
        let (lxi, lyi) = (pos(left_siblings, lx), pos(left_siblings, ly));
        let (rxi, ryi) = (pos(right_siblings, rx), pos(right_siblings, ry));

        if lxi < lyi {
            rxi > ryi
        } else if lxi > lyi {
            rxi < ryi
        } else {
            false
        }
    }

    /// The children of the lowest common ancestor of `a` and `b` on the paths
    /// towards them, or `(a, b)` if they are siblings.
    fn lca(&self, a: Ix, b: Ix) -> (Ix, Ix) {
        if let Some(hit) = self.lca.get(&(a, b)) {
            return *hit;
        }
        if let Some(hit) = self.lca.get(&(b, a)) {
            let (x, y) = *hit;
            return (y, x);
        }

        let result = if self.arena.siblings[a].contains(&b) {
            (a, b)
        } else {
            let (a_path, b_path) = (self.arena.path_to_root(a), self.arena.path_to_root(b));
            let (mut i, mut j) = (a_path.len(), b_path.len());
            loop {
                i -= 1;
                j -= 1;
                let (l, r) = (a_path[i], b_path[j]);
                if l != r || i == 0 || j == 0 {
                    break (l, r);
                }
            }
        };
        *self.lca.entry((a, b)).or_insert(result)
    }

    /// Lower and upper cost bounds of every edge in the partial candidate set
    /// `current`, in the order of `current`.
    pub fn bounds(&self, current: &[Edge]) -> Vec<(f32, f32)> {
        let mut containing: Vec<Vec<Ix>> = vec![Vec::new(); self.arena.len()];
        for (k, e) in current.iter().enumerate() {
            for x in [e.m, e.n].into_iter().flatten() {
                containing[x].push(k);
            }
        }

        let eval = |e: &Edge| self.edge_bounds(e, current, &containing);
        let bounds: Vec<(f32, f32)> = if self.params.parallel {
            current.par_iter().map(eval).collect()
        } else {
            current.iter().map(eval).collect()
        };
        self.lca.clear();
        bounds
    }

    fn edge_bounds(&self, e: &Edge, current: &[Edge], containing: &[Vec<Ix>]) -> (f32, f32) {
        let (Some(m), Some(n)) = (e.m, e.n) else {
            return (self.params.wn, self.params.wn);
        };
        let partners = |x: Ix| containing[x].iter().map(move |&k| current[k].other(x));

        let renaming = self.renaming_cost(m, n);
        let ancestry = self.bound_ancestry(m, n, &partners);
        let breakup = self.bound_sibling_breakup(m, n, &partners);
        let ordering = self.bound_ordering((m, n), current, containing);

        (
            renaming + ancestry.0 + breakup.0 + ordering.0,
            renaming + ancestry.1 + breakup.1 + ordering.1,
        )
    }

    fn bound_ancestry<P, I>(&self, m: Ix, n: Ix, partners: &P) -> (f32, f32)
    where
        P: Fn(Ix) -> I,
        I: Iterator<Item = Option<Ix>>,
    {
        let (mut lower, mut upper) = (0usize, 0usize);
        for (parent, partner) in [(m, n), (n, m)] {
            let partner_children = &self.arena.children[partner];
            let violates = |p: Option<Ix>| p.is_some_and(|p| !partner_children.contains(&p));
            for &c in &self.arena.children[parent] {
                if partners(c).all(violates) {
                    lower += 1;
                }
                if partners(c).any(violates) {
                    upper += 1;
                }
            }
        }
        (
            self.params.wa * lower as f32,
            self.params.wa * upper as f32,
        )
    }

    fn bound_sibling_breakup<P, I>(&self, m: Ix, n: Ix, partners: &P) -> (f32, f32)
    where
        P: Fn(Ix) -> I,
        I: Iterator<Item = Option<Ix>>,
    {
        let side = |a: Ix, b: Ix| -> (f32, f32) {
            let b_others: Vec<Ix> = self.arena.other_siblings(b).collect();
            let invariant = |p: Option<Ix>| p.is_some_and(|p| b_others.contains(&p));
            let divergent = |p: Option<Ix>| p.is_some() && !invariant(p);

            let (mut d_lo, mut d_hi, mut i_lo, mut i_hi) = (0f32, 0f32, 0f32, 0f32);
            for s in self.arena.other_siblings(a) {
                if partners(s).all(divergent) {
                    d_lo += 1.0;
                }
                if partners(s).any(divergent) {
                    d_hi += 1.0;
                }
                if partners(s).all(invariant) {
                    i_lo += 1.0;
                }
                if partners(s).any(invariant) {
                    i_hi += 1.0;
                }
            }
            if d_lo == 0.0 && d_hi == 0.0 {
                return (0.0, 0.0);
            }
            let (i_lo, i_hi) = (i_lo + 1.0, i_hi + 1.0);
            (d_lo / (i_hi * (d_lo + 1.0)), d_hi / i_lo)
        };

        let (mn, nm) = (side(m, n), side(n, m));
        (
            self.params.ws * (mn.0 + nm.0),
            self.params.ws * (mn.1 + nm.1) / 2.0,
        )
    }

    fn bound_ordering(&self, edge: (Ix, Ix), current: &[Edge], containing: &[Vec<Ix>]) -> (f32, f32) {
        let (m, n) = edge;
        let siblings: Vec<Ix> = self
            .arena
            .other_siblings(m)
            .chain(self.arena.other_siblings(n))
            .collect();
        let violates = |k: Ix| match (current[k].m, current[k].n) {
            (Some(a), Some(b)) => self.violates_ordering((a, b), edge),
            _ => false,
        };

        let possible = siblings.iter().all(|&s| {
            containing[s]
                .iter()
                .any(|&k| current[k].is_no_match() || !violates(k))
        });
        if !possible {
            return (self.params.wo, self.params.wo);
        }

        let violation_possible = siblings
            .iter()
            .any(|&s| containing[s].iter().any(|&k| violates(k)));
        (0.0, if violation_possible { self.params.wo } else { 0.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::test_support::*;
    use crate::types::Revision;

    fn params() -> CostModelParams {
        CostModelParams {
            parallel: false,
            ..Default::default()
        }
    }

    fn trees() -> (AstNode, AstNode) {
        (
            tagged(ordered("A", vec![leaf("x"), leaf("y")]), Revision::Left),
            tagged(ordered("A", vec![leaf("x"), leaf("y")]), Revision::Right),
        )
    }

    #[test]
    fn test_arena_layout() {
        let (l, r) = trees();
        let arena = TreeArena::new(&l, &r);
        assert_eq!(arena.len(), 6);
        assert_eq!(arena.left_len, 3);
        assert_eq!(arena.children[3], vec![4, 5]);
        assert_eq!(arena.siblings[0], vec![0]);
        assert_eq!(arena.siblings[1], vec![1, 2]);
        assert!(arena.ordered[1] && !arena.ordered[0]);
        assert!(arena.in_subtree(0, 2) && !arena.in_subtree(1, 2));
        assert_eq!(arena.lookup(r.children()[1].node_ref()), Some(5));
    }

    #[test]
    fn test_identity_costs_nothing() {
        let (l, r) = trees();
        let graph = CostGraph::new(&l, &r, params());
        let edges = vec![
            Edge::new(Some(0), Some(3)),
            Edge::new(Some(1), Some(4)),
            Edge::new(Some(2), Some(5)),
        ];
        let (costs, total) = graph.exact_costs(&edges);
        assert!(costs.iter().all(|&c| c == 0.0));
        assert_eq!(total, 0.0);
    }

    #[test]
    fn test_swapped_children_violate_ordering() {
        let (l, r) = trees();
        let graph = CostGraph::new(&l, &r, params());
        let edges = vec![
            Edge::new(Some(0), Some(3)),
            Edge::new(Some(1), Some(5)),
            Edge::new(Some(2), Some(4)),
        ];
        let (costs, _) = graph.exact_costs(&edges);
        // Both child edges rename (x/y) and are ordered against each other.
        assert_eq!(costs[1], 2.0);
        assert_eq!(costs[2], 2.0);
    }

    #[test]
    fn test_unmatched_nodes_cost_wn() {
        let (l, r) = trees();
        let graph = CostGraph::new(&l, &r, params());
        let edges = vec![
            Edge::new(Some(0), Some(3)),
            Edge::new(Some(1), None),
            Edge::new(Some(2), None),
            Edge::new(None, Some(4)),
            Edge::new(None, Some(5)),
        ];
        let (costs, total) = graph.exact_costs(&edges);
        assert_eq!(&costs[1..], &[1.0, 1.0, 1.0, 1.0]);
        assert!((total - 4.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_uncovered_node_is_reported() {
        let (l, r) = trees();
        let graph = CostGraph::new(&l, &r, params());
        let edges = vec![Edge::new(Some(0), Some(3))];
        let images = Images::new(&graph.arena, &edges);
        assert!(matches!(
            graph.exact_cost(&edges[0], &images),
            Err(MatchingsError::Uncovered(_))
        ));
    }

    #[test]
    fn test_bounds_bracket_exact_cost_of_identity() {
        let (l, r) = trees();
        let graph = CostGraph::new(&l, &r, params());
        let current = vec![
            Edge::new(Some(0), Some(3)),
            Edge::new(Some(1), Some(4)),
            Edge::new(Some(2), Some(5)),
        ];
        for (lower, upper) in graph.bounds(&current) {
            assert_eq!(lower, 0.0);
            assert_eq!(upper, 0.0);
        }
    }

    #[test]
    fn test_lca_of_cousins() {
        let l = tagged(
            ordered("R", vec![ordered("P", vec![leaf("a")]), ordered("Q", vec![leaf("b")])]),
            Revision::Left,
        );
        let r = tagged(AstNode::leaf("R", ""), Revision::Right);
        let graph = CostGraph::new(&l, &r, params());
        // a = 2 below P = 1, b = 4 below Q = 3.
        assert_eq!(graph.lca(2, 4), (1, 3));
        assert_eq!(graph.lca(4, 2), (3, 1));
        assert_eq!(graph.lca(1, 3), (1, 3));
    }
}
