use crate::intersection::approach_registry::{ApproachId, ApproachRegistry};
use crate::simulation_engine::traffic_source::VehicleObservation;

/// A preemption request raised by one emergency vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct EmergencyRequest {
    pub vehicle_id: String,
    pub approach: ApproachId,
    pub lane: String,
    /// Meters to the stop line at the last observation.
    pub distance: f64,
    pub detected_at: u64,
    /// First tick the request's approach showed green after detection.
    pub first_green_at: Option<u64>,
}

impl EmergencyRequest {
    /// Ticks between detection and first green, the responsiveness KPI.
    pub fn wait(&self) -> Option<u64> {
        self.first_green_at
            .map(|green| green.saturating_sub(self.detected_at))
    }

    /// A request the controller may act on: known vehicle, configured
    /// approach, sane distance, green not before detection.
    pub fn is_well_formed(&self, registry: &ApproachRegistry) -> bool {
        !self.vehicle_id.is_empty()
            && registry.contains(self.approach)
            && self.distance.is_finite()
            && self.distance >= 0.0
            && self.first_green_at.map_or(true, |g| g >= self.detected_at)
    }
}

/// Finds emergency vehicles close to the stop line on the incoming lanes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmergencyDetector {
    pub detection_radius: f64,
}

impl EmergencyDetector {
    pub fn new(detection_radius: f64) -> Self {
        Self { detection_radius }
    }

    /// Closest qualifying emergency vehicle, if any. On equal distance the
    /// vehicle reported first wins.
    pub fn find_closest(
        &self,
        vehicles: &[VehicleObservation],
        registry: &ApproachRegistry,
        now: u64,
    ) -> Option<EmergencyRequest> {
        let mut best: Option<EmergencyRequest> = None;
        for vehicle in vehicles.iter().filter(|v| v.is_emergency) {
            let Some(lane) = vehicle.lane.as_deref() else {
                continue;
            };
            let Some(approach) = registry.approach_for_lane(lane) else {
                continue;
            };
            if !vehicle.distance_to_stop_line.is_finite() {
                continue;
            }
            let distance = vehicle.distance_to_stop_line.max(0.0);
            if distance > self.detection_radius {
                continue;
            }
            if best.as_ref().map_or(true, |b| distance < b.distance) {
                best = Some(EmergencyRequest {
                    vehicle_id: vehicle.id.clone(),
                    approach,
                    lane: lane.to_string(),
                    distance,
                    detected_at: now,
                    first_green_at: None,
                });
            }
        }
        best
    }

    /// True once the vehicle has left the simulation or is no longer on any
    /// incoming lane.
    pub fn is_cleared(
        &self,
        vehicle_id: &str,
        vehicles: &[VehicleObservation],
        registry: &ApproachRegistry,
    ) -> bool {
        match vehicles.iter().find(|v| v.id == vehicle_id) {
            None => true,
            Some(vehicle) => match vehicle.lane.as_deref() {
                None => true,
                Some(lane) => !registry.is_incoming_lane(lane),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;

    fn registry() -> ApproachRegistry {
        ApproachRegistry::from_config(&ControllerConfig::default()).unwrap()
    }

    fn vehicle(id: &str, lane: Option<&str>, distance: f64, is_emergency: bool) -> VehicleObservation {
        VehicleObservation {
            id: id.to_string(),
            lane: lane.map(str::to_string),
            distance_to_stop_line: distance,
            is_emergency,
        }
    }

    #[test]
    fn picks_closest_emergency_within_radius() {
        let vehicles = vec![
            vehicle("car_1", Some("north_in_0"), 5.0, false),
            vehicle("amb_1", Some("east_in_1"), 140.0, true),
            vehicle("amb_2", Some("south_in_0"), 60.0, true),
            vehicle("amb_3", Some("west_in_0"), 180.0, true),
        ];
        let detector = EmergencyDetector::new(150.0);
        let req = detector.find_closest(&vehicles, &registry(), 7).unwrap();
        assert_eq!(req.vehicle_id, "amb_2");
        assert_eq!(req.approach, ApproachId::South);
        assert_eq!(req.detected_at, 7);
        assert_eq!(req.wait(), None);
    }

    #[test]
    fn ignores_vehicles_outside_incoming_lanes() {
        let vehicles = vec![
            vehicle("amb_1", Some("north_out_0"), 10.0, true),
            vehicle("amb_2", None, 0.0, true),
        ];
        let detector = EmergencyDetector::new(200.0);
        assert!(detector.find_closest(&vehicles, &registry(), 0).is_none());
    }

    #[test]
    fn radius_is_inclusive() {
        let vehicles = vec![vehicle("amb_1", Some("north_in_0"), 150.0, true)];
        let detector = EmergencyDetector::new(150.0);
        assert!(detector.find_closest(&vehicles, &registry(), 0).is_some());
    }

    #[test]
    fn clearance_by_lane_membership() {
        let registry = registry();
        let detector = EmergencyDetector::new(200.0);
        let approaching = vec![vehicle("amb_1", Some("north_in_0"), 3.0, true)];
        let crossed = vec![vehicle("amb_1", Some("south_out_0"), 90.0, true)];
        let in_box = vec![vehicle("amb_1", None, 0.0, true)];
        assert!(!detector.is_cleared("amb_1", &approaching, &registry));
        assert!(detector.is_cleared("amb_1", &crossed, &registry));
        assert!(detector.is_cleared("amb_1", &in_box, &registry));
    }

    #[test]
    fn departed_vehicle_stays_cleared() {
        let registry = registry();
        let detector = EmergencyDetector::new(200.0);
        for _ in 0..5 {
            assert!(detector.is_cleared("amb_9", &[], &registry));
        }
    }

    #[test]
    fn malformed_request_is_detected() {
        let registry = ApproachRegistry::from_config(&ControllerConfig::two_way()).unwrap();
        let mut req = EmergencyRequest {
            vehicle_id: "amb_1".to_string(),
            approach: ApproachId::North,
            lane: "north_in_0".to_string(),
            distance: 20.0,
            detected_at: 4,
            first_green_at: Some(5),
        };
        assert!(req.is_well_formed(&registry));
        req.approach = ApproachId::West;
        assert!(!req.is_well_formed(&registry));
        req.approach = ApproachId::North;
        req.distance = f64::NAN;
        assert!(!req.is_well_formed(&registry));
    }
}
