//! Static junction geometry, derived once at controller construction.
//!
//! Lane headings and bounding boxes, the junction's control region, intergreen
//! time from junction diameter, and the lane → upstream edge → induction loop
//! associations used to scope detector evidence to the right approach. Every
//! table here is indexed by small integer lane ids and never mutated after
//! [`JunctionGeometry::build`] returns.

use std::collections::HashSet;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::channel::POSITION_NOISE_SIGMA_M;
use crate::{
    heading_between, heading_delta, ConfigError, ControllerOptions, EdgeId, JunctionDef,
    JunctionId, LaneDef, LaneId, LoopId, NetworkLayout, Point, VehicleReport,
};

/// Junction diameters (metres) at which intergreen grows by one second.
pub const DIAMETER_THRESHOLDS: [f64; 7] = [10.0, 19.0, 28.0, 38.0, 47.0, 56.0, 65.0];
pub const BASE_INTERGREEN_S: u32 = 5;

/// Upstream edges walked per route when scoping detector evidence.
pub const MAX_UPSTREAM_EDGES: usize = 3;
/// Upstream approaches further off the lane heading than this are ignored.
pub const APPROACH_HEADING_TOLERANCE_DEG: f64 = 20.0;
/// Loops further than this from the junction centre never contribute.
pub const LOOP_SEARCH_RADIUS_M: f64 = 200.0;
/// Clearance kept between this junction's control region and a neighbour's.
pub const REGION_EXCLUSION_MARGIN_M: f64 = 5.0;
/// Heading tolerance when matching a report to a lane by position alone.
pub const LANE_MATCH_HEADING_TOLERANCE_DEG: f64 = 30.0;
/// Extra lane-box margin when reported positions carry noise (3σ).
pub const NOISY_MATCH_MARGIN_M: f64 = 3.0 * POSITION_NOISE_SIGMA_M;

/// Intergreen seconds for a junction of the given diameter.
pub fn get_intergreen(diameter_m: f64) -> u32 {
    let mut intergreen = BASE_INTERGREEN_S;
    for threshold in DIAMETER_THRESHOLDS {
        if diameter_m < threshold {
            return intergreen;
        }
        intergreen += 1;
    }
    intergreen
}

/// Largest distance between any two points of a junction outline.
pub fn junction_diameter(shape: &[Point]) -> f64 {
    let mut diameter = 0.0_f64;
    for (i, a) in shape.iter().enumerate() {
        for b in &shape[i + 1..] {
            diameter = diameter.max(a.distance(*b));
        }
    }
    diameter
}

// ---------------------------------------------------------------------------
// Bounding boxes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Point,
    pub max: Point,
}

impl BoundingBox {
    pub fn around(centre: Point, half_side: f64) -> Self {
        Self {
            min: Point::new(centre.x - half_side, centre.y - half_side),
            max: Point::new(centre.x + half_side, centre.y + half_side),
        }
    }

    /// Smallest box containing every point, grown by `margin` on each side.
    pub fn from_points(points: &[Point], margin: f64) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = Self {
            min: *first,
            max: *first,
        };
        for p in &points[1..] {
            bbox.min.x = bbox.min.x.min(p.x);
            bbox.min.y = bbox.min.y.min(p.y);
            bbox.max.x = bbox.max.x.max(p.x);
            bbox.max.y = bbox.max.y.max(p.y);
        }
        Some(bbox.expanded(margin))
    }

    pub fn expanded(self, margin: f64) -> Self {
        Self {
            min: Point::new(self.min.x - margin, self.min.y - margin),
            max: Point::new(self.max.x + margin, self.max.y + margin),
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Distance from `p` to the box, zero inside it.
    pub fn distance_to(&self, p: Point) -> f64 {
        let dx = (self.min.x - p.x).max(p.x - self.max.x).max(0.0);
        let dy = (self.min.y - p.y).max(p.y - self.max.y).max(0.0);
        dx.hypot(dy)
    }
}

/// Square region of half-side `scan_range` around `centre`, pulled back on
/// the dominant axis from every neighbouring signalised junction that falls
/// within reach, so neighbouring regions never overlap.
pub fn control_region(centre: Point, scan_range: f64, neighbours: &[Point]) -> BoundingBox {
    let mut region = BoundingBox::around(centre, scan_range);
    for n in neighbours {
        if !region.expanded(REGION_EXCLUSION_MARGIN_M).contains(*n) {
            continue;
        }
        let dx = n.x - centre.x;
        let dy = n.y - centre.y;
        if dx.abs() >= dy.abs() {
            let mid = centre.x + dx / 2.0;
            if dx > 0.0 {
                region.max.x = region.max.x.min(mid - REGION_EXCLUSION_MARGIN_M);
            } else {
                region.min.x = region.min.x.max(mid + REGION_EXCLUSION_MARGIN_M);
            }
        } else {
            let mid = centre.y + dy / 2.0;
            if dy > 0.0 {
                region.max.y = region.max.y.min(mid - REGION_EXCLUSION_MARGIN_M);
            } else {
                region.min.y = region.min.y.max(mid + REGION_EXCLUSION_MARGIN_M);
            }
        }
    }
    region
}

// ---------------------------------------------------------------------------
// Lanes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct LaneGeometry {
    pub id: LaneId,
    pub edge: EdgeId,
    /// Heading of the final segment, i.e. the approach into the junction.
    pub heading: f64,
    pub bbox: BoundingBox,
    pub stop_line: Point,
    /// Twice the lane speed limit, in metres.
    pub catch_distance: f64,
    /// Edges (own edge first) whose detectors count for this lane.
    pub upstream_edges: SmallVec<[EdgeId; 4]>,
    pub loops: SmallVec<[LoopId; 4]>,
}

fn approach_heading(lane: &LaneDef) -> Option<f64> {
    let n = lane.shape.len();
    if n < 2 {
        return None;
    }
    Some(heading_between(lane.shape[n - 2], lane.shape[n - 1]))
}

// ---------------------------------------------------------------------------
// JunctionGeometry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct JunctionGeometry {
    pub junction: JunctionId,
    pub position: Point,
    pub diameter: f64,
    pub intergreen: u32,
    pub has_pedestrian_crossing: bool,
    region: BoundingBox,
    /// Added to every lane box when matching reports without a declared lane.
    match_margin: f64,
    lanes: Vec<LaneGeometry>,
    link_lanes: Vec<usize>,
    lane_index: AHashMap<LaneId, usize>,
}

impl JunctionGeometry {
    pub fn build(
        layout: &NetworkLayout,
        junction_id: &JunctionId,
        options: &ControllerOptions,
    ) -> Result<Self, ConfigError> {
        let junction = layout
            .junction(junction_id)
            .ok_or_else(|| ConfigError::UnknownJunction(junction_id.clone()))?;
        if junction.controlled_links.is_empty() {
            return Err(ConfigError::NoControlledLinks(junction_id.clone()));
        }

        let lane_defs: AHashMap<&LaneId, &LaneDef> =
            layout.lanes.iter().map(|l| (&l.id, l)).collect();

        let mut lanes = Vec::new();
        let mut lane_index = AHashMap::new();
        let mut link_lanes = Vec::with_capacity(junction.controlled_links.len());
        for lane_id in &junction.controlled_links {
            if let Some(&idx) = lane_index.get(lane_id) {
                link_lanes.push(idx);
                continue;
            }
            let def = lane_defs
                .get(lane_id)
                .copied()
                .ok_or_else(|| ConfigError::UnknownLane {
                    lane: lane_id.clone(),
                    context: format!("junction '{junction_id}' controlled links"),
                })?;
            let lane = build_lane(layout, junction, def, &lane_defs)?;
            let idx = lanes.len();
            lanes.push(lane);
            lane_index.insert(lane_id.clone(), idx);
            link_lanes.push(idx);
        }

        let neighbours: Vec<Point> = layout
            .signalised_junctions()
            .filter(|j| &j.id != junction_id)
            .map(|j| j.position)
            .collect();
        let diameter = junction_diameter(&junction.shape);

        Ok(Self {
            junction: junction_id.clone(),
            position: junction.position,
            diameter,
            intergreen: get_intergreen(diameter),
            has_pedestrian_crossing: junction.pedestrian_crossing,
            region: control_region(junction.position, options.scan_range_meters, &neighbours),
            match_margin: if options.positional_noise_enabled {
                NOISY_MATCH_MARGIN_M
            } else {
                0.0
            },
            lanes,
            link_lanes,
            lane_index,
        })
    }

    pub fn region(&self) -> &BoundingBox {
        &self.region
    }

    pub fn lanes(&self) -> &[LaneGeometry] {
        &self.lanes
    }

    pub fn lane(&self, idx: usize) -> &LaneGeometry {
        &self.lanes[idx]
    }

    pub fn lane_index_of(&self, lane: &LaneId) -> Option<usize> {
        self.lane_index.get(lane).copied()
    }

    /// Number of controlled links, i.e. the length of every control string.
    pub fn link_count(&self) -> usize {
        self.link_lanes.len()
    }

    /// Incoming lanes with a green indication (`G` or `g`) in `control`,
    /// sorted and deduplicated.
    pub fn active_lanes(&self, control: &str) -> Vec<usize> {
        let mut active: Vec<usize> = control
            .chars()
            .zip(&self.link_lanes)
            .filter(|(c, _)| matches!(c, 'G' | 'g'))
            .map(|(_, &lane)| lane)
            .collect();
        active.sort_unstable();
        active.dedup();
        active
    }

    /// Controlled lane a report belongs to: its declared lane when that lane is
    /// controlled here, otherwise the heading-compatible lane nearest the
    /// report among those whose box, grown by the noise margin, contains it.
    pub fn match_lane(&self, report: &VehicleReport) -> Option<usize> {
        if let Some(idx) = report.lane.as_ref().and_then(|l| self.lane_index_of(l)) {
            return Some(idx);
        }
        let mut best: Option<(usize, f64)> = None;
        for (idx, lane) in self.lanes.iter().enumerate() {
            if !lane.bbox.expanded(self.match_margin).contains(report.position)
                || heading_delta(lane.heading, report.heading) > LANE_MATCH_HEADING_TOLERANCE_DEG
            {
                continue;
            }
            let distance = lane.bbox.distance_to(report.position);
            if best.is_none_or(|(_, d)| distance < d) {
                best = Some((idx, distance));
            }
        }
        best.map(|(idx, _)| idx)
    }
}

fn build_lane(
    layout: &NetworkLayout,
    junction: &JunctionDef,
    def: &LaneDef,
    lane_defs: &AHashMap<&LaneId, &LaneDef>,
) -> Result<LaneGeometry, ConfigError> {
    let heading = approach_heading(def).ok_or_else(|| ConfigError::DegenerateLane(def.id.clone()))?;
    let bbox = BoundingBox::from_points(&def.shape, def.width / 2.0)
        .ok_or_else(|| ConfigError::DegenerateLane(def.id.clone()))?;
    let stop_line = def.shape[def.shape.len() - 1];
    let upstream_edges = build_upstream_edges(layout, junction, def, heading, lane_defs)?;
    let loops = build_inductor_map(layout, junction.position, &upstream_edges, lane_defs);
    Ok(LaneGeometry {
        id: def.id.clone(),
        edge: def.edge.clone(),
        heading,
        bbox,
        stop_line,
        catch_distance: 2.0 * def.speed_limit,
        upstream_edges,
        loops,
    })
}

/// Walks every route through the lane's edge up to [`MAX_UPSTREAM_EDGES`]
/// edges back, stopping at the first edge that ends at another signalised
/// junction, and keeps the edges approaching on the lane's heading.
fn build_upstream_edges(
    layout: &NetworkLayout,
    junction: &JunctionDef,
    lane: &LaneDef,
    lane_heading: f64,
    lane_defs: &AHashMap<&LaneId, &LaneDef>,
) -> Result<SmallVec<[EdgeId; 4]>, ConfigError> {
    let edge_defs: AHashMap<&EdgeId, &crate::EdgeDef> =
        layout.edges.iter().map(|e| (&e.id, e)).collect();
    let signalised: HashSet<&JunctionId> =
        layout.signalised_junctions().map(|j| &j.id).collect();

    let mut upstream: SmallVec<[EdgeId; 4]> = SmallVec::new();
    upstream.push(lane.edge.clone());

    for route in &layout.routes {
        for (pos, edge) in route.edges.iter().enumerate() {
            if edge != &lane.edge {
                continue;
            }
            for up in route.edges[..pos].iter().rev().take(MAX_UPSTREAM_EDGES) {
                let def = edge_defs.get(up).ok_or_else(|| ConfigError::UnknownEdge {
                    edge: up.clone(),
                    context: format!("route '{}'", route.id),
                })?;
                if def.to_junction != junction.id && signalised.contains(&def.to_junction) {
                    break;
                }
                if upstream.contains(up) {
                    continue;
                }
                let relevant = edge_heading(up, lane_defs).is_some_and(|h| {
                    heading_delta(h, lane_heading) <= APPROACH_HEADING_TOLERANCE_DEG
                });
                if relevant {
                    upstream.push(up.clone());
                }
            }
        }
    }
    Ok(upstream)
}

fn edge_heading(edge: &EdgeId, lane_defs: &AHashMap<&LaneId, &LaneDef>) -> Option<f64> {
    let mut lanes: Vec<&&LaneDef> = lane_defs.values().filter(|l| &l.edge == edge).collect();
    lanes.sort_by(|a, b| a.id.cmp(&b.id));
    lanes.first().and_then(|l| approach_heading(l))
}

/// Induction loops on any of `edges` within [`LOOP_SEARCH_RADIUS_M`] of the junction.
fn build_inductor_map(
    layout: &NetworkLayout,
    junction_position: Point,
    edges: &[EdgeId],
    lane_defs: &AHashMap<&LaneId, &LaneDef>,
) -> SmallVec<[LoopId; 4]> {
    layout
        .loops
        .iter()
        .filter(|l| l.position.distance(junction_position) <= LOOP_SEARCH_RADIUS_M)
        .filter(|l| {
            lane_defs
                .get(&l.lane)
                .is_some_and(|lane| edges.contains(&lane.edge))
        })
        .map(|l| l.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{four_arm_layout, junction_id};

    #[test]
    fn intergreen_buckets() {
        assert_eq!(get_intergreen(15.0), 6);
        assert_eq!(get_intergreen(9.0), 5);
        assert_eq!(get_intergreen(70.0), 12);
        assert_eq!(get_intergreen(10.0), 6);
    }

    #[test]
    fn diameter_is_widest_span() {
        let square = [
            Point::new(0.0, 0.0),
            Point::new(3.0, 0.0),
            Point::new(3.0, 4.0),
            Point::new(0.0, 4.0),
        ];
        assert!((junction_diameter(&square) - 5.0).abs() < 1e-9);
        assert!(junction_diameter(&square[..1]).abs() < 1e-9);
    }

    #[test]
    fn lane_headings_follow_final_segment() {
        let geometry = JunctionGeometry::build(
            &four_arm_layout(),
            &junction_id(),
            &ControllerOptions::default(),
        )
        .unwrap();
        let north = geometry.lane_index_of(&LaneId::from("n_in_0")).unwrap();
        let west = geometry.lane_index_of(&LaneId::from("w_in_0")).unwrap();
        assert!((geometry.lane(north).heading - 180.0).abs() < 1e-9);
        assert!((geometry.lane(west).heading - 90.0).abs() < 1e-9);
        assert!((geometry.lane(north).catch_distance - 27.8).abs() < 1e-9);
    }

    #[test]
    fn active_lanes_follow_green_links() {
        let geometry = JunctionGeometry::build(
            &four_arm_layout(),
            &junction_id(),
            &ControllerOptions::default(),
        )
        .unwrap();
        let active = geometry.active_lanes("GgrR");
        assert_eq!(active.len(), 2);
        assert!(geometry.active_lanes("rrrr").is_empty());
    }

    #[test]
    fn upstream_walk_stops_at_signalised_neighbour() {
        let geometry = JunctionGeometry::build(
            &four_arm_layout(),
            &junction_id(),
            &ControllerOptions::default(),
        )
        .unwrap();
        let north = geometry.lane(geometry.lane_index_of(&LaneId::from("n_in_0")).unwrap());
        // n_far ends at an unsignalised node: walked through.
        assert!(north.upstream_edges.contains(&EdgeId::from("n_far")));
        assert!(north.loops.contains(&LoopId::from("n_far_loop")));
        assert!(north.loops.contains(&LoopId::from("n_loop")));

        let east = geometry.lane(geometry.lane_index_of(&LaneId::from("e_in_0")).unwrap());
        // e_link ends at the neighbouring signalised junction: walk stops.
        assert!(!east.upstream_edges.contains(&EdgeId::from("e_link")));
        assert!(!east.loops.contains(&LoopId::from("e_link_loop")));
        assert!(east.loops.contains(&LoopId::from("e_loop")));
    }

    #[test]
    fn upstream_edges_off_heading_are_dropped() {
        let geometry = JunctionGeometry::build(
            &four_arm_layout(),
            &junction_id(),
            &ControllerOptions::default(),
        )
        .unwrap();
        let south = geometry.lane(geometry.lane_index_of(&LaneId::from("s_in_0")).unwrap());
        // s_side approaches from the west before turning north onto s_in.
        assert!(!south.upstream_edges.contains(&EdgeId::from("s_side")));
        assert!(!south.loops.contains(&LoopId::from("s_side_loop")));
    }

    #[test]
    fn control_region_clears_neighbours() {
        let region = control_region(Point::new(0.0, 0.0), 200.0, &[Point::new(300.0, 0.0)]);
        assert!((region.max.x - 145.0).abs() < 1e-9);
        assert!((region.min.x + 200.0).abs() < 1e-9);
        assert!((region.max.y - 200.0).abs() < 1e-9);

        let untouched = control_region(Point::new(0.0, 0.0), 100.0, &[Point::new(300.0, 0.0)]);
        assert!((untouched.max.x - 100.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_junction_is_structural() {
        let err = JunctionGeometry::build(
            &four_arm_layout(),
            &JunctionId::from("nowhere"),
            &ControllerOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::UnknownJunction(JunctionId::from("nowhere")));
    }

    #[test]
    fn report_matches_lane_by_box_and_heading() {
        let geometry = JunctionGeometry::build(
            &four_arm_layout(),
            &junction_id(),
            &ControllerOptions::default(),
        )
        .unwrap();
        let mut report = crate::test_fixtures::report("v1", Point::new(-1.6, 60.0), 180.0, 10.0, 0.0);
        let north = geometry.lane_index_of(&LaneId::from("n_in_0"));
        assert_eq!(geometry.match_lane(&report), north);

        // Wrong way on the same lane: no match.
        report.heading = 0.0;
        assert_eq!(geometry.match_lane(&report), None);

        // Declared lane wins over geometry.
        report.lane = Some(LaneId::from("e_in_0"));
        assert_eq!(geometry.match_lane(&report), geometry.lane_index_of(&LaneId::from("e_in_0")));
    }

    #[test]
    fn exact_boxes_without_noise() {
        let geometry = JunctionGeometry::build(
            &four_arm_layout(),
            &junction_id(),
            &ControllerOptions::default(),
        )
        .unwrap();
        // 2 m off the centreline of n_in, outside its 1.6 m half-width.
        let report = crate::test_fixtures::report("v1", Point::new(-3.6, 20.0), 180.0, 8.0, 0.0);
        assert_eq!(geometry.match_lane(&report), None);
    }

    #[test]
    fn noisy_reports_still_match_their_lane() {
        use crate::channel::{BroadcastChannel, ChannelConfig};
        use crate::test_fixtures::car;
        use crate::VehicleId;
        use rand::SeedableRng;

        let options = ControllerOptions {
            positional_noise_enabled: true,
            ..ControllerOptions::default()
        };
        let geometry = JunctionGeometry::build(&four_arm_layout(), &junction_id(), &options).unwrap();
        let north = geometry.lane_index_of(&LaneId::from("n_in_0"));
        let mut channel = BroadcastChannel::new(
            ChannelConfig::from(&options),
            geometry.position,
            *geometry.region(),
            rand_chacha::ChaCha8Rng::seed_from_u64(11),
        );
        let raw = std::collections::BTreeMap::from([(
            VehicleId::from("v1"),
            car(-1.6, 20.0, 180.0, 8.0),
        )]);

        let mut matched = 0;
        for step in 0..2000 {
            channel.update(&raw, f64::from(step) * 0.1);
            let report = &channel.transmit()[&VehicleId::from("v1")];
            if geometry.match_lane(report) == north {
                matched += 1;
            }
        }
        // Only draws beyond 3σ across the lane can fall outside the margin.
        assert!(matched >= 1980, "matched {matched}/2000");
    }
}
