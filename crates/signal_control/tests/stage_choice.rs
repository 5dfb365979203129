use signal_control::PolicyKind;
use signal_core::test_fixtures::{car, four_arm_geometry, RecordingActuator};
use signal_core::{
    AdaptiveController, ControllerOptions, Mode, Observations, PlanSet, Stage, StageId, VehicleId,
};

fn three_stage_plans() -> PlanSet {
    let stages: Vec<Stage> = [("ns", "GGrr"), ("north_west", "GrrG"), ("ew", "rrGG")]
        .into_iter()
        .map(|(id, control)| Stage {
            id: StageId::from(id),
            control_string: control.to_string(),
            period: 30.0,
        })
        .collect();
    Mode::ALL.into_iter().map(|m| (m, stages.clone())).collect()
}

/// Stage served right after the first switch, with one car queued on the east arm.
fn first_choice(kind: PolicyKind) -> usize {
    let mut controller = AdaptiveController::new(
        four_arm_geometry(),
        &three_stage_plans(),
        ControllerOptions::default(),
        kind.build(),
        17,
    )
    .unwrap();
    assert_eq!(controller.policy_name(), kind.as_str());

    let obs = Observations {
        vehicles: [(VehicleId::from("east"), car(45.0, 1.6, 270.0, 0.0))].into(),
        ..Observations::default()
    };
    let mut actuator = RecordingActuator::default();
    for now in (0..20_000).step_by(100) {
        let report = controller.decide(now, &obs, &mut actuator).unwrap();
        if report.stage_index != 0 {
            assert_eq!(now, 12_000);
            return report.stage_index;
        }
    }
    panic!("no stage switch within 20 s");
}

#[test]
fn test_round_robin_follows_plan_order() {
    assert_eq!(first_choice(PolicyKind::RoundRobin), 1);
}

#[test]
fn test_demand_weighted_jumps_to_loaded_approach() {
    assert_eq!(first_choice(PolicyKind::DemandWeighted), 2);
}

#[test]
fn test_activation_gated_skips_empty_stage() {
    assert_eq!(first_choice(PolicyKind::ActivationGated), 2);
}
