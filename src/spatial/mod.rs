pub mod intersect;

pub use intersect::{circle_polygon_intersect, circles_intersect, has_adjacent, polygon_contains};
