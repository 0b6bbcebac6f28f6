use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

/// Rendering column index.
pub type Lane = u32;

/// Greedy interval colouring of `appointments` into display lanes.
///
/// Appointments are visited in `schedule_order`; each takes the lowest lane
/// not already held by an overlapping, previously placed appointment. The
/// visiting order is part of the contract: a different order can give a
/// different (still collision-free) layout.
pub fn assign_lanes(appointments: &[Appointment]) -> HashMap<Ulid, Lane> {
    let mut sorted: Vec<&Appointment> = appointments.iter().collect();
    sorted.sort_by(|a, b| schedule_order(a, b));

    let mut lanes = HashMap::with_capacity(sorted.len());
    let mut placed: Vec<(&Appointment, Lane)> = Vec::with_capacity(sorted.len());

    for appointment in sorted {
        let mut taken: Vec<Lane> = placed
            .iter()
            .filter(|(other, _)| other.id != appointment.id && other.overlaps(appointment))
            .map(|(_, lane)| *lane)
            .collect();
        taken.sort_unstable();
        taken.dedup();

        let lane = lowest_free(&taken);
        placed.push((appointment, lane));
        lanes.insert(appointment.id, lane);
    }

    lanes
}

/// First gap in a sorted, deduplicated lane list: `[0, 1, 3]` → `2`.
fn lowest_free(taken: &[Lane]) -> Lane {
    let mut lane = 0;
    for &t in taken {
        if t != lane {
            break;
        }
        lane += 1;
    }
    lane
}
