use crate::error::{RankError, Result};

pub type NodeID = usize;

pub trait Graph {
    /// Get number of rows in graph
    fn len(&self) -> usize;

    /// Get number of edges in graph
    fn edges(&self) -> usize;

    /// Get degree of row in graph
    fn degree(&self, idx: NodeID) -> usize;

    /// Get the columns adjacent to a row
    fn get_edges(&self, idx: NodeID) -> &[NodeID];
}

/// Global metadata about the loaded graph.  Built once by the loader and never
/// changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphInfo {
    pub vertex_count: usize,
    pub edge_count: usize,
    pub directed: bool
}

impl GraphInfo {
    pub fn new(vertex_count: usize, edge_count: usize, directed: bool) -> Self {
        GraphInfo { vertex_count, edge_count, directed }
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_count == 0
    }
}

/// The raw edge list, in input order.  Undirected graphs store each input edge
/// once; the reverse direction is produced by `arcs`.
#[derive(Debug, Clone)]
pub struct EdgeList {
    info: GraphInfo,
    edges: Vec<(NodeID, NodeID)>
}

impl EdgeList {
    /// Checks every endpoint against `info.vertex_count`.
    pub fn new(info: GraphInfo, edges: Vec<(NodeID, NodeID)>) -> Result<Self> {
        let n = info.vertex_count;
        if let Some((src, dst)) = edges.iter().find(|(s, d)| *s >= n || *d >= n) {
            return Err(RankError::VertexOutOfRange { src: *src, dst: *dst, vertex_count: n })
        }
        let info = GraphInfo { edge_count: edges.len(), ..info };
        Ok(EdgeList { info, edges })
    }

    /// Wraps edges that were already range-checked against `info`.
    #[cfg(test)]
    pub(crate) fn from_parts(info: GraphInfo, edges: Vec<(NodeID, NodeID)>) -> Self {
        debug_assert_eq!(info.edge_count, edges.len());
        EdgeList { info, edges }
    }

    pub fn info(&self) -> &GraphInfo {
        &self.info
    }

    pub fn edges(&self) -> &[(NodeID, NodeID)] {
        &self.edges
    }

    /// Iterates the arcs of the effective graph: every edge as is, followed by
    /// its reverse when the graph is undirected.
    pub fn arcs(&self) -> impl Iterator<Item=(NodeID, NodeID)> + '_ {
        let undirected = !self.info.directed;
        self.edges.iter().flat_map(move |&(src, dst)| {
            let reverse = if undirected { Some((dst, src)) } else { None };
            std::iter::once((src, dst)).chain(reverse)
        })
    }

    /// Number of arcs yielded by `arcs`.
    pub fn num_arcs(&self) -> usize {
        if self.info.directed { self.edges.len() } else { self.edges.len() * 2 }
    }
}

/// In and out degrees of the effective graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Degrees {
    in_degree: Vec<u64>,
    out_degree: Vec<u64>
}

impl Degrees {
    pub fn from_edges(edge_list: &EdgeList) -> Self {
        let n = edge_list.info().vertex_count;
        let mut in_degree = vec![0u64; n];
        let mut out_degree = vec![0u64; n];
        for (src, dst) in edge_list.arcs() {
            out_degree[src] += 1;
            in_degree[dst] += 1;
        }
        Degrees { in_degree, out_degree }
    }

    pub fn len(&self) -> usize {
        self.out_degree.len()
    }

    pub fn in_degree(&self, v: NodeID) -> usize {
        self.in_degree[v] as usize
    }

    pub fn out_degree(&self, v: NodeID) -> usize {
        self.out_degree[v] as usize
    }

    pub fn in_degrees(&self) -> &[u64] {
        &self.in_degree
    }

    pub fn out_degrees(&self) -> &[u64] {
        &self.out_degree
    }
}

/// Compressed Sparse Row Format.  We use this for graphs since adjancency
/// lists tend to use more memory.
#[derive(Debug, Clone)]
pub struct CSR {
    rows: Vec<usize>,
    columns: Vec<NodeID>
}

impl CSR {
    /// Builds a CSR with exactly `num_rows` rows.  Columns within a row keep the
    /// order in which they were provided.
    pub fn construct_from_edges(num_rows: usize, edges: &[(NodeID, NodeID)]) -> Self {

        // Figure out how many out edges per row
        let mut rows = vec![0; num_rows + 1];
        edges.iter().for_each(|(from_node, _to_node)| {
            rows[*from_node + 1] += 1;
        });

        // Convert to row offset format
        let mut offset = 0;
        rows.iter_mut().skip(1).for_each(|count| {
            offset += *count;
            *count = offset;
        });

        // Insert columns
        let mut counts  = vec![0; num_rows];
        let mut columns = vec![0; edges.len()];
        edges.iter().for_each(|(from_node, to_node)| {
            let idx = rows[*from_node] + counts[*from_node];
            columns[idx] = *to_node;
            counts[*from_node] += 1;
        });

        CSR { rows, columns }
    }

    /// Rows that have at least one column.
    pub fn non_empty_rows(&self) -> impl Iterator<Item=NodeID> + '_ {
        self.rows.windows(2)
            .enumerate()
            .filter(|(_, start_stop)| start_stop[1] > start_stop[0])
            .map(|(row, _)| row)
    }

}

impl Graph for CSR {
    // Get number of rows in graph
    fn len(&self) -> usize {
        self.rows.len() - 1
    }

    // Get number of edges in graph
    fn edges(&self) -> usize {
        self.columns.len()
    }

    // Get degree of row in graph
    fn degree(&self, idx: NodeID) -> usize {
        self.rows[idx+1] - self.rows[idx]
    }

    // Get columns adjacent to a row
    fn get_edges(&self, idx: NodeID) -> &[NodeID] {
        let start = self.rows[idx];
        let stop  = self.rows[idx+1];
        &self.columns[start..stop]
    }

}

#[cfg(test)]
mod csr_tests {
    use super::*;

    fn build_edges() -> Vec<(usize, usize)> {
        vec![
            (0, 1),
            (1, 1),
            (1, 2),
            (2, 0),
            (1, 0),
        ]
    }

    #[test]
    fn construct_csr() {
        let edges = build_edges();

        let csr = CSR::construct_from_edges(3, &edges);
        assert_eq!(csr.rows, vec![0, 1, 4, 5]);
        assert_eq!(csr.columns, vec![1, 1, 2, 0, 0]);
    }

    #[test]
    fn test_graph() {
        let edges = build_edges();

        let csr = CSR::construct_from_edges(4, &edges);
        assert_eq!(csr.len(), 4);
        assert_eq!(csr.edges(), 5);
        assert_eq!(csr.degree(0), 1);
        assert_eq!(csr.degree(1), 3);
        assert_eq!(csr.degree(2), 1);
        assert_eq!(csr.degree(3), 0);
        assert_eq!(csr.get_edges(2), &[0]);
        assert_eq!(csr.get_edges(1), &[1, 2, 0]);
        assert_eq!(csr.get_edges(3), &[] as &[NodeID]);
        assert_eq!(csr.non_empty_rows().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn undirected_arcs_and_degrees() {
        let info = GraphInfo::new(3, 3, false);
        let el = EdgeList::from_parts(info, vec![(0, 1), (1, 2), (2, 2)]);
        let arcs: Vec<_> = el.arcs().collect();
        assert_eq!(arcs, vec![(0, 1), (1, 0), (1, 2), (2, 1), (2, 2), (2, 2)]);
        assert_eq!(el.num_arcs(), 6);

        let degrees = Degrees::from_edges(&el);
        assert_eq!(degrees.out_degrees(), &[1, 2, 3]);
        assert_eq!(degrees.in_degrees(), &[1, 2, 3]);
    }

    #[test]
    fn edge_list_checks_range() {
        let el = EdgeList::new(GraphInfo::new(4, 0, true), vec![(0, 3), (2, 1)]).unwrap();
        assert_eq!(el.info().edge_count, 2);
        assert_eq!(el.num_arcs(), 2);

        match EdgeList::new(GraphInfo::new(3, 2, true), vec![(0, 1), (1, 3)]) {
            Err(RankError::VertexOutOfRange { src, dst, vertex_count }) => assert_eq!((src, dst, vertex_count), (1, 3, 3)),
            other => panic!("unexpected {:?}", other)
        }
    }

    #[test]
    fn degrees_are_counted_in_u64() {
        let el = EdgeList::from_parts(GraphInfo::new(2, 3, true), vec![(0, 1); 3]);
        let degrees = Degrees::from_edges(&el);
        let out: &[u64] = degrees.out_degrees();
        assert_eq!(out, &[3, 0]);
        assert_eq!(degrees.in_degrees(), &[0, 3]);
    }

    #[test]
    fn directed_degrees_keep_duplicates() {
        let info = GraphInfo::new(3, 3, true);
        let el = EdgeList::from_parts(info, vec![(0, 1), (0, 1), (1, 1)]);
        let degrees = Degrees::from_edges(&el);
        assert_eq!(degrees.out_degree(0), 2);
        assert_eq!(degrees.in_degree(1), 3);
        assert_eq!(degrees.out_degree(2), 0);
        assert_eq!(degrees.in_degree(2), 0);
    }

}
