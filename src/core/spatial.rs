//! Region lookup for shelf sections and behavioural zones.

use serde::{Deserialize, Serialize};

/// A named rectangle in sensor coordinates (metres).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: u32,
    pub name: String,
    pub x_start: f64,
    pub x_end: f64,
    pub y_start: f64,
    pub y_end: f64,
    /// Product or planogram reference shown on this section
    #[serde(default)]
    pub product_ref: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Region {
    pub fn new(id: u32, name: impl Into<String>, x: (f64, f64), y: (f64, f64)) -> Self {
        Self {
            id,
            name: name.into(),
            x_start: x.0.min(x.1),
            x_end: x.0.max(x.1),
            y_start: y.0.min(y.1),
            y_end: y.0.max(y.1),
            product_ref: None,
            active: true,
        }
    }

    pub fn with_product(mut self, product_ref: impl Into<String>) -> Self {
        self.product_ref = Some(product_ref.into());
        self
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.x_start + self.x_end) / 2.0,
            (self.y_start + self.y_end) / 2.0,
        )
    }

    /// Inclusive containment, with every bound widened by `margin`.
    pub fn contains(&self, x: f64, y: f64, margin: f64) -> bool {
        self.x_start - margin <= x
            && x <= self.x_end + margin
            && self.y_start - margin <= y
            && y <= self.y_end + margin
    }

    pub fn distance_to_center(&self, x: f64, y: f64) -> f64 {
        let (cx, cy) = self.center();
        (x - cx).hypot(y - cy)
    }
}

/// How a point was attributed to a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionMatch {
    pub region_id: u32,
    pub region_name: String,
    pub product_ref: Option<String>,
    /// False when the point lies outside every region and the nearest one was used
    pub contained: bool,
    pub distance_to_center: f64,
}

impl RegionMatch {
    fn new(region: &Region, contained: bool, x: f64, y: f64) -> Self {
        Self {
            region_id: region.id,
            region_name: region.name.clone(),
            product_ref: region.product_ref.clone(),
            contained,
            distance_to_center: region.distance_to_center(x, y),
        }
    }
}

/// Read-only index over the configured regions.
#[derive(Debug, Clone, Default)]
pub struct SpatialIndex {
    regions: Vec<Region>,
    margin: f64,
}

impl SpatialIndex {
    pub fn new(regions: Vec<Region>, margin: f64) -> Self {
        Self {
            regions,
            margin: margin.max(0.0),
        }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// The active region containing the point, closest center first, lowest id on ties.
    pub fn locate(&self, x: f64, y: f64) -> Option<&Region> {
        self.closest(
            self.regions
                .iter()
                .filter(|r| r.active && r.contains(x, y, self.margin)),
            x,
            y,
        )
    }

    /// The region whose center is nearest the point, containing or not.
    /// Active regions win; inactive ones are used only when nothing is active.
    pub fn nearest(&self, x: f64, y: f64) -> Option<&Region> {
        self.closest(self.regions.iter().filter(|r| r.active), x, y)
            .or_else(|| self.closest(self.regions.iter(), x, y))
    }

    /// Attribute a point to a region, falling back to the nearest center
    /// when nothing contains it. `None` only when the index is empty.
    pub fn attribute(&self, x: f64, y: f64) -> Option<RegionMatch> {
        if let Some(region) = self.locate(x, y) {
            return Some(RegionMatch::new(region, true, x, y));
        }
        self.nearest(x, y)
            .map(|region| RegionMatch::new(region, false, x, y))
    }

    fn closest<'a>(
        &self,
        candidates: impl Iterator<Item = &'a Region>,
        x: f64,
        y: f64,
    ) -> Option<&'a Region> {
        candidates.min_by(|a, b| {
            a.distance_to_center(x, y)
                .total_cmp(&b.distance_to_center(x, y))
                .then_with(|| a.id.cmp(&b.id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shelf() -> Vec<Region> {
        vec![
            Region::new(1, "top-left", (0.0, 0.5), (0.0, 0.3)).with_product("SKU-1"),
            Region::new(2, "top-right", (0.5, 1.0), (0.0, 0.3)).with_product("SKU-2"),
            Region::new(3, "bottom-left", (0.0, 0.5), (0.3, 0.6)),
        ]
    }

    #[test]
    fn test_locate_inside() {
        let index = SpatialIndex::new(shelf(), 0.0);
        assert_eq!(index.locate(0.2, 0.1).map(|r| r.id), Some(1));
        assert_eq!(index.locate(0.8, 0.2).map(|r| r.id), Some(2));
        assert!(index.locate(5.0, 5.0).is_none());
    }

    #[test]
    fn test_shared_edge_prefers_nearest_center() {
        let index = SpatialIndex::new(shelf(), 0.0);
        // On the x = 0.5 edge, equidistant from both centers: lowest id wins.
        assert_eq!(index.locate(0.5, 0.15).map(|r| r.id), Some(1));
        // Inside the margin of both 1 and 3, nearer to 3's center.
        let index = SpatialIndex::new(shelf(), 0.05);
        assert_eq!(index.locate(0.25, 0.34).map(|r| r.id), Some(3));
    }

    #[test]
    fn test_margin_widens_bounds() {
        let index = SpatialIndex::new(shelf(), 0.05);
        assert_eq!(index.locate(-0.04, 0.1).map(|r| r.id), Some(1));
        let strict = SpatialIndex::new(shelf(), 0.0);
        assert!(strict.locate(-0.04, 0.1).is_none());
    }

    #[test]
    fn test_inactive_regions_ignored() {
        let mut regions = shelf();
        regions[0].active = false;
        let index = SpatialIndex::new(regions, 0.0);
        assert!(index.locate(0.2, 0.1).is_none());
        assert_ne!(index.nearest(0.2, 0.1).map(|r| r.id), Some(1));
    }

    #[test]
    fn test_fallback_to_nearest_center() {
        let index = SpatialIndex::new(shelf(), 0.05);
        let matched = index.attribute(100.0, 100.0).unwrap();
        assert!(!matched.contained);
        assert_eq!(matched.region_id, 2);

        let single = SpatialIndex::new(vec![Region::new(9, "only", (0.0, 1.0), (0.0, 1.0))], 0.0);
        assert_eq!(single.attribute(100.0, 100.0).map(|m| m.region_id), Some(9));
    }

    #[test]
    fn test_all_inactive_still_attributed() {
        let regions = shelf()
            .into_iter()
            .map(|mut r| {
                r.active = false;
                r
            })
            .collect();
        let index = SpatialIndex::new(regions, 0.0);
        assert!(index.locate(0.2, 0.1).is_none());
        let matched = index.attribute(0.2, 0.1).unwrap();
        assert_eq!(matched.region_id, 1);
        assert!(!matched.contained);
    }

    #[test]
    fn test_no_regions() {
        let index = SpatialIndex::default();
        assert!(index.attribute(0.0, 0.0).is_none());
    }
}
