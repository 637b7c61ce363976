use std::fmt::Write as _;

use client_core::{view::signal_label, DashboardView};
use shared::domain::{Direction, Intersection};

const DIRECTIONS: [Direction; 4] = [
    Direction::North,
    Direction::South,
    Direction::East,
    Direction::West,
];

/// One line per view revision, used by `watch`.
pub fn summary_line(view: &DashboardView) -> String {
    let status = view
        .status
        .as_ref()
        .map(|s| format!("{:?}", s.system_status).to_lowercase())
        .unwrap_or_else(|| "unknown".to_string());
    let updated = view
        .last_update_at
        .map(|at| at.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "rev {} [{:?}] intersections={} priority={} vehicles={} system={} updated={}",
        view.revision,
        view.connection,
        view.intersections.len(),
        view.priority_intersections().count(),
        view.emergency_vehicles.len(),
        status,
        updated,
    )
}

/// N/S/E/W signal row, e.g. `N:RED S:RED E:GRN W:GRN`.
pub fn signal_row(intersection: &Intersection) -> String {
    let mut row = String::new();
    for direction in DIRECTIONS {
        if !row.is_empty() {
            row.push(' ');
        }
        let label = intersection
            .light(direction)
            .map(|light| signal_label(light.status))
            .unwrap_or("---");
        let _ = write!(row, "{}:{label}", direction_letter(direction));
    }
    row
}

pub fn intersection_line(intersection: &Intersection) -> String {
    let marker = if intersection.emergency_priority {
        "!"
    } else {
        " "
    };
    format!(
        "{marker} {:<10} {:<24} {}  flow={:.2}",
        intersection.id.as_str(),
        intersection.name,
        signal_row(intersection),
        intersection.traffic_flow_rate,
    )
}

fn direction_letter(direction: Direction) -> char {
    match direction {
        Direction::North => 'N',
        Direction::South => 'S',
        Direction::East => 'E',
        Direction::West => 'W',
    }
}
