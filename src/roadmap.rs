//! Linear roadmap of hurdles with periodic boss nodes.

use serde::Serialize;

use crate::domain::Difficulty;

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RoadmapNode {
  Hurdle {
    id: String,
    #[serde(rename = "chunkIdx")]
    chunk_idx: u32,
    diff: Difficulty,
  },
  Boss {
    id: String,
    covers: Vec<u32>,
    #[serde(rename = "minScore")]
    min_score: f64,
  },
}

#[cfg(test)]
impl RoadmapNode {
  fn id(&self) -> &str {
    match self {
      RoadmapNode::Hurdle { id, .. } | RoadmapNode::Boss { id, .. } => id,
    }
  }
}

#[derive(Clone, Debug, Serialize, PartialEq, Default)]
pub struct Roadmap {
  pub nodes: Vec<RoadmapNode>,
  /// `[from, to]` node id pairs.
  pub edges: Vec<[String; 2]>,
}

/// `chunks` is `(idx, difficulty)` in reading order. `boss_every == 0` builds a
/// roadmap without bosses; each boss advertises `boss_min_score` as its pass bar.
pub fn build_linear_roadmap(chunks: &[(u32, Difficulty)], boss_every: u32, boss_min_score: f64) -> Roadmap {
  let mut map = Roadmap::default();
  for (pos, (idx, diff)) in chunks.iter().enumerate() {
    let n = pos as u32 + 1;
    let hid = format!("h{n}");
    map.nodes.push(RoadmapNode::Hurdle { id: hid.clone(), chunk_idx: *idx, diff: *diff });
    if n > 1 {
      map.edges.push([format!("h{}", n - 1), hid.clone()]);
    }
    if boss_every > 0 && n % boss_every == 0 {
      let bid = format!("b{}", n / boss_every);
      let covers = chunks[pos + 1 - boss_every as usize..=pos].iter().map(|(i, _)| *i).collect();
      map.nodes.push(RoadmapNode::Boss { id: bid.clone(), covers, min_score: boss_min_score });
      map.edges.push([hid, bid]);
    }
  }
  map
}
