use std::iter::Peekable;

use crate::token::{Token, Tokenizer};
use crate::TopologyError;

/// A node in the expander topology tree (§9 design note: this replaces the
/// source's `CXLController : CXLSwitch` inheritance with a plain sum type).
/// The root, returned by [`parse`], is always a `Switch`.
#[derive(Debug, Clone, PartialEq)]
pub enum TopologyNode {
    /// A leaf holds the zero-based index of its `Region` in the topology's
    /// region vector (Newick labels are 1-based; the offset is applied at
    /// parse time so downstream code never repeats the `- 1`).
    Leaf(usize),
    /// An internal switch: an ordered list of children plus the fraction of
    /// traffic crossing this node that reaches each child. The Newick subset
    /// in §6 carries no branch-length tokens, so fan-out is always uniform:
    /// `weight = 1 / children.len()`.
    Switch {
        children: Vec<TopologyNode>,
        weight: f64,
    },
}

/// Read/write traffic split used to scale a leaf's latency/bandwidth.
/// Not required to sum to 1.0 — a pure-write epoch has `read_ratio == 0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleRatio {
    pub read_ratio: f64,
    pub write_ratio: f64,
}

/// Parses a Newick-subset tree string into a `TopologyNode::Switch` root.
///
/// `num_regions` is the number of regions already inserted via
/// `Topology::insert_end_point` — leaf labels are validated against it so an
/// undefined label (e.g. `(3)` with only 2 regions inserted) is caught here
/// rather than surfacing as an out-of-bounds index later.
pub fn parse(s: &str, num_regions: usize) -> Result<TopologyNode, TopologyError> {
    let mut toks = Tokenizer::new(s).peekable();
    let root = parse_node(&mut toks, num_regions)?;
    match toks.next() {
        None => {}
        Some(Ok(_)) => {
            return Err(TopologyError::Malformed(
                "trailing tokens after a complete tree".into(),
            ))
        }
        Some(Err(e)) => return Err(e),
    }
    match root {
        TopologyNode::Switch { .. } => Ok(root),
        // A bare leaf at the root (e.g. "1" with no parens) is still a valid
        // single-region topology; wrap it so the root invariant holds.
        leaf => Ok(TopologyNode::Switch {
            children: vec![leaf],
            weight: 1.0,
        }),
    }
}

fn parse_node(
    toks: &mut Peekable<impl Iterator<Item = Result<Token, TopologyError>>>,
    num_regions: usize,
) -> Result<TopologyNode, TopologyError> {
    match toks.next() {
        Some(Ok(Token::Int(n))) => {
            if n == 0 || n as usize > num_regions {
                return Err(TopologyError::UndefinedLabel(n));
            }
            Ok(TopologyNode::Leaf((n - 1) as usize))
        }
        Some(Ok(Token::LParen)) => {
            let mut children = vec![parse_node(toks, num_regions)?];
            loop {
                match toks.next() {
                    Some(Ok(Token::Comma)) => children.push(parse_node(toks, num_regions)?),
                    Some(Ok(Token::RParen)) => break,
                    Some(Ok(_)) => {
                        return Err(TopologyError::Malformed(
                            "expected ',' or ')' inside node list".into(),
                        ))
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Err(TopologyError::Malformed("unbalanced parentheses".into())),
                }
            }
            let weight = 1.0 / children.len() as f64;
            Ok(TopologyNode::Switch { children, weight })
        }
        Some(Ok(Token::RParen)) | Some(Ok(Token::Comma)) => Err(TopologyError::Malformed(
            "unexpected ')' or ',' at start of node".into(),
        )),
        Some(Err(e)) => Err(e),
        None => Err(TopologyError::Malformed(
            "unexpected end of input while expecting a node".into(),
        )),
    }
}

/// Walks the tree post-order, returning the weight-scaled, ratio-scaled
/// latency contribution in nanoseconds. `weight` is the caller-supplied
/// portion of traffic crossing the subtree rooted at `node` (1.0 at the
/// top-level call).
pub fn calculate_latency(
    node: &TopologyNode,
    regions: &[cxlmem_model::Region],
    weight: f64,
    ratio: SampleRatio,
) -> f64 {
    match node {
        TopologyNode::Leaf(idx) => {
            let r = &regions[*idx];
            weight * (r.read_latency_ns * ratio.read_ratio + r.write_latency_ns * ratio.write_ratio)
        }
        TopologyNode::Switch { children, weight: w } => children
            .iter()
            .map(|c| calculate_latency(c, regions, weight * w, ratio))
            .sum(),
    }
}

/// Same traversal as [`calculate_latency`], for bandwidth in MB/s.
pub fn calculate_bandwidth(
    node: &TopologyNode,
    regions: &[cxlmem_model::Region],
    weight: f64,
    ratio: SampleRatio,
) -> f64 {
    match node {
        TopologyNode::Leaf(idx) => {
            let r = &regions[*idx];
            weight * (r.read_bw_mbps * ratio.read_ratio + r.write_bw_mbps * ratio.write_ratio)
        }
        TopologyNode::Switch { children, weight: w } => children
            .iter()
            .map(|c| calculate_bandwidth(c, regions, weight * w, ratio))
            .sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_region_topology() {
        let root = parse("(1)", 1).unwrap();
        assert_eq!(
            root,
            TopologyNode::Switch {
                children: vec![TopologyNode::Leaf(0)],
                weight: 1.0
            }
        );
    }

    #[test]
    fn two_region_interleave_topology() {
        let root = parse("(1,2)", 2).unwrap();
        match root {
            TopologyNode::Switch { children, weight } => {
                assert_eq!(children.len(), 2);
                assert_eq!(weight, 0.5);
            }
            _ => panic!("expected switch root"),
        }
    }

    #[test]
    fn nested_topology() {
        let root = parse("((1,2),3)", 3).unwrap();
        if let TopologyNode::Switch { children, .. } = &root {
            assert_eq!(children.len(), 2);
            assert!(matches!(children[1], TopologyNode::Leaf(2)));
        } else {
            panic!("expected switch root");
        }
    }

    #[test]
    fn unbalanced_parens_is_malformed() {
        assert!(matches!(
            parse("((1,2)", 2),
            Err(TopologyError::Malformed(_))
        ));
    }

    #[test]
    fn undefined_label_is_rejected() {
        assert!(matches!(
            parse("(1,2)", 1),
            Err(TopologyError::UndefinedLabel(2))
        ));
    }

    #[test]
    fn topology_round_trips_single_region() {
        let root = parse("(1)", 1).unwrap();
        let regions = vec![cxlmem_model::Region::new(1, 300.0, 400.0, 50.0, 50.0, 1024)];
        let ratio = SampleRatio {
            read_ratio: 1.0,
            write_ratio: 0.0,
        };
        assert_eq!(calculate_latency(&root, &regions, 1.0, ratio), 300.0);
    }
}
