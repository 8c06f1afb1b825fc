use v2v_sim::math::Point2d;
use v2v_sim::{
    CommsMode, NodeId, RoadEdge, RoadGraph, RoadNode, RunConfig, Simulation, VehicleAttributes,
    VehicleId,
};

/// A four-way intersection: two 100m roads crossing at the origin.
fn crossroads() -> RoadGraph {
    let nodes = [
        (0, -50.0, 0.0),
        (1, 0.0, 0.0),
        (2, 50.0, 0.0),
        (3, 0.0, -50.0),
        (4, 0.0, 50.0),
    ]
    .map(|(id, x, y)| RoadNode {
        id: NodeId(id),
        position: Point2d::new(x, y),
    });
    let edges = [(0, 1), (1, 2), (3, 1), (1, 4)].map(|(from, to)| RoadEdge {
        from: NodeId(from),
        to: NodeId(to),
        width: 3.5,
    });
    RoadGraph::new(nodes.to_vec(), edges.to_vec(), vec![vec![NodeId(1)]], vec![])
        .expect("valid demo map")
}

fn run(mode: CommsMode) {
    let config = RunConfig {
        mode,
        packet_loss: 0.1,
        latency: 0.1,
        seed: 1,
        ..Default::default()
    };
    let mut sim = Simulation::new(crossroads(), config);

    // Two vehicles on a collision course through the intersection.
    let spawns = [
        (0, Point2d::new(-50.0, 0.0), Point2d::new(50.0, 0.0), 0.0),
        (
            1,
            Point2d::new(0.0, -50.0),
            Point2d::new(0.0, 50.0),
            std::f64::consts::FRAC_PI_2,
        ),
    ];
    for (id, spawn, destination, heading) in spawns {
        sim.add_vehicle(
            VehicleId(id),
            &VehicleAttributes {
                spawn,
                destination,
                heading,
                speed: 4.0,
                preferred_speed: 4.0,
                aggressiveness: 0.5,
            },
        )
        .expect("demo map is connected");
    }

    while sim.iter_vehicles().count() > 0 && sim.tick() < 2000 {
        sim.step();
    }

    println!("{mode:?}: {} after {} ticks", sim.stats(), sim.tick());
}

fn main() {
    run(CommsMode::Baseline);
    run(CommsMode::V2v);
}
