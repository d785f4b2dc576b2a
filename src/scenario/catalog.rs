//! Built-in scenarios.

use super::plan::{
    Action, IdentitySpec, Introduction, QuorumBinding, ScenarioCase, ScenarioPlan, Step,
    TopologyPlan,
};
use crate::amount::RbtAmount;
use crate::config::AddressFormat;
use crate::lifecycle::NodeFamily;
use crate::provision::Endpoint;
use crate::quorum::QuorumGroup;
use crate::topology::DidKind;

/// Names of the built-in scenarios, in their default execution order.
pub const SCENARIO_NAMES: [&str; 5] = [
    "rbt_transfer",
    "bip39_nlss",
    "ping_peer",
    "periodic_pledging",
    "quorum_did_same_srv",
];

/// Registry key of the primary quorum group.
const PRIMARY_QUORUM: &str = "quorum";

/// Look up a built-in scenario.
#[must_use]
pub fn by_name(name: &str) -> Option<ScenarioPlan> {
    match name {
        "rbt_transfer" => Some(rbt_transfer()),
        "bip39_nlss" => Some(bip39_nlss()),
        "ping_peer" => Some(ping_peer()),
        "periodic_pledging" => Some(periodic_pledging()),
        "quorum_did_same_srv" => Some(quorum_did_same_srv()),
        _ => None,
    }
}

/// Every built-in scenario.
#[must_use]
pub fn all() -> Vec<ScenarioPlan> {
    SCENARIO_NAMES.iter().filter_map(|name| by_name(name)).collect()
}

fn amount(literal: &str) -> RbtAmount {
    // Catalog literals are constants checked by the tests below.
    RbtAmount::parse(literal).unwrap_or_else(|e| unreachable!("catalog amount: {e}"))
}

fn transfer(from: &Endpoint, to: &Endpoint, literal: &str) -> Action {
    Action::Transfer {
        from: from.clone(),
        to: to.clone(),
        amount: amount(literal),
    }
}

fn fund(target: &Endpoint, tokens: u64) -> Action {
    Action::Fund {
        target: target.clone(),
        tokens,
    }
}

fn introduce(subject: &Endpoint, to_node: &str) -> Action {
    Action::IntroducePeer {
        subject: subject.clone(),
        to_node: to_node.to_string(),
    }
}

fn identity(endpoint: &Endpoint, kind: DidKind, register: bool) -> IdentitySpec {
    IdentitySpec {
        node: endpoint.node.clone(),
        alias: endpoint.alias.clone(),
        kind,
        register,
    }
}

fn binding(node: &str, group: &str) -> QuorumBinding {
    QuorumBinding {
        node: node.to_string(),
        group: group.to_string(),
    }
}

fn mutual_introductions(a: &Endpoint, b: &Endpoint) -> Vec<Introduction> {
    vec![
        Introduction {
            subject: b.clone(),
            to_node: a.node.clone(),
        },
        Introduction {
            subject: a.clone(),
            to_node: b.node.clone(),
        },
    ]
}

/// Transfers between two secondary-family nodes bound to the primary quorum.
#[must_use]
pub fn rbt_transfer() -> ScenarioPlan {
    let a = Endpoint::new("nodeNq14", "did_a");
    let b = Endpoint::new("nodeNq15", "did_b");

    let shuttle = ScenarioCase {
        name: "shuttle_transfer".to_string(),
        steps: vec![
            Step::pass(fund(&a, 2)),
            Step::pass(transfer(&a, &b, "0.5")),
            Step::pass(transfer(&a, &b, "1.499")),
            Step::pass(transfer(&b, &a, "0.25")),
            Step::pass(transfer(&b, &a, "0.25")),
            Step::pass(transfer(&b, &a, "0.25")),
            Step::pass(transfer(&b, &a, "0.25")),
            Step::pass(transfer(&a, &b, "1")),
            Step::pass(fund(&a, 2)),
            Step::pass(transfer(&a, &b, "2")),
            Step::pass(transfer(&a, &b, "0.001")),
        ],
    };
    let insufficient = ScenarioCase {
        name: "insufficient_balance_transfer".to_string(),
        steps: vec![
            Step::fail(transfer(&a, &b, "100")),
            Step::fail(transfer(&b, &a, "100")),
        ],
    };
    let max_decimal = ScenarioCase {
        name: "max_decimal_place_transfer".to_string(),
        steps: vec![Step::fail(transfer(&b, &a, "0.000000009"))],
    };

    ScenarioPlan {
        name: "rbt_transfer".to_string(),
        snapshot_file: "non_quorum_config.json".to_string(),
        topology: TopologyPlan {
            registry_key: "non_quorum".to_string(),
            family: NodeFamily::Secondary,
            identities: vec![
                identity(&a, DidKind::Lite, true),
                identity(&b, DidKind::Lite, true),
            ],
            quorum_groups: Vec::new(),
            bindings: vec![
                binding(&a.node, PRIMARY_QUORUM),
                binding(&b.node, PRIMARY_QUORUM),
            ],
            introductions: mutual_introductions(&a, &b),
        },
        cases: vec![shuttle, insufficient, max_decimal],
    }
}

/// Transfers between a BIP39 (lite) identity and an NLSS (basic) identity.
#[must_use]
pub fn bip39_nlss() -> ScenarioPlan {
    let bip39 = Endpoint::new("node11", "bip39_1");
    let nlss = Endpoint::new("node12", "nlss_1");

    let nlss_to_bip39 = ScenarioCase {
        name: "nlss_to_bip39".to_string(),
        steps: vec![
            Step::pass(fund(&nlss, 3)),
            Step::pass(transfer(&nlss, &bip39, "1")),
            Step::pass(transfer(&nlss, &bip39, "1.5")),
            Step::pass(transfer(&nlss, &bip39, "0.5")),
        ],
    };
    let bip39_to_nlss = ScenarioCase {
        name: "bip39_to_nlss".to_string(),
        steps: vec![
            Step::pass(transfer(&bip39, &nlss, "0.5")),
            Step::pass(transfer(&bip39, &nlss, "1.5")),
            Step::pass(transfer(&bip39, &nlss, "1")),
        ],
    };

    ScenarioPlan {
        name: "bip39_nlss".to_string(),
        snapshot_file: "bip39_nlss_config.json".to_string(),
        topology: TopologyPlan {
            registry_key: "bip39_nlss".to_string(),
            family: NodeFamily::Primary,
            identities: vec![
                identity(&bip39, DidKind::Lite, true),
                identity(&nlss, DidKind::Basic, true),
            ],
            quorum_groups: Vec::new(),
            bindings: vec![
                binding(&bip39.node, PRIMARY_QUORUM),
                binding(&nlss.node, PRIMARY_QUORUM),
            ],
            introductions: mutual_introductions(&bip39, &nlss),
        },
        cases: vec![nlss_to_bip39, bip39_to_nlss],
    }
}

/// Transfers between nodes served by different quorum groups, introduced
/// to each other only while the transfers run.
#[must_use]
pub fn ping_peer() -> ScenarioPlan {
    let a = Endpoint::new("node18", "did_a");
    let b = Endpoint::new("node19", "did_b");
    let second = QuorumGroup::numbered("quorum2", 2);

    let shuttle = ScenarioCase {
        name: "shuttle_transfer".to_string(),
        steps: vec![
            Step::pass(fund(&a, 3)),
            Step::pass(introduce(&b, &a.node)),
            Step::pass(transfer(&a, &b, "0.5")),
            Step::pass(introduce(&a, &b.node)),
            Step::pass(transfer(&b, &a, "0.25")),
            Step::pass(transfer(&a, &b, "1.499")),
            Step::pass(transfer(&b, &a, "0.25")),
            Step::pass(transfer(&b, &a, "0.25")),
            Step::pass(transfer(&a, &b, "1")),
            Step::pass(transfer(&b, &a, "0.25")),
            Step::pass(fund(&a, 2)),
            Step::pass(transfer(&a, &b, "2")),
            Step::pass(transfer(&a, &b, "0.001")),
            Step::pass(transfer(&b, &a, "1.25")),
        ],
    };

    ScenarioPlan {
        name: "ping_peer".to_string(),
        snapshot_file: "ping_peer_config.json".to_string(),
        topology: TopologyPlan {
            registry_key: "ping_peer".to_string(),
            family: NodeFamily::Primary,
            identities: vec![
                identity(&a, DidKind::Lite, false),
                identity(&b, DidKind::Lite, false),
            ],
            bindings: vec![
                binding(&a.node, PRIMARY_QUORUM),
                binding(&b.node, &second.name),
            ],
            quorum_groups: vec![second],
            introductions: Vec::new(),
        },
        cases: vec![shuttle],
    }
}

/// A single transfer from a node holding a second, idle identity, with
/// peers introduced just before the transfer.
#[must_use]
pub fn periodic_pledging() -> ScenarioPlan {
    let a = Endpoint::new("node16", "did_a");
    let a1 = Endpoint::new("node16", "did_a1");
    let b = Endpoint::new("node17", "did_b");

    let shuttle = ScenarioCase {
        name: "shuttle_transfer".to_string(),
        steps: vec![
            Step::pass(fund(&a, 4)),
            Step::pass(introduce(&b, &a.node)),
            Step::pass(transfer(&a, &b, "3")),
        ],
    };

    ScenarioPlan {
        name: "periodic_pledging".to_string(),
        snapshot_file: "periodic_pledging.json".to_string(),
        topology: TopologyPlan {
            registry_key: "periodic_pledging".to_string(),
            family: NodeFamily::Primary,
            identities: vec![
                identity(&a, DidKind::Lite, false),
                identity(&a1, DidKind::Lite, false),
                identity(&b, DidKind::Lite, false),
            ],
            quorum_groups: Vec::new(),
            bindings: vec![
                binding(&a.node, PRIMARY_QUORUM),
                binding(&b.node, PRIMARY_QUORUM),
            ],
            introductions: Vec::new(),
        },
        cases: vec![shuttle],
    }
}

/// Seven quorum identities on one server, loaded by every node of the
/// scenario, with senders and receivers spread across the servers.
#[must_use]
pub fn quorum_did_same_srv() -> ScenarioPlan {
    const HOST: &str = "node20";
    const SECOND: &str = "node21";
    const THIRD: &str = "node22";

    let mut same_node = QuorumGroup::hosted(
        "same_node",
        "quorumlist_all_same_node.json",
        &[HOST],
        "did_q",
        7,
    );
    same_node.fund_tokens = Some(20);
    same_node.address_format = Some(AddressFormat::Bare);

    let pairs = [
        (Endpoint::new(HOST, "did_S1"), Endpoint::new(HOST, "did_R1")),
        (Endpoint::new(SECOND, "did_S2"), Endpoint::new(SECOND, "did_R2")),
        (Endpoint::new(SECOND, "did_S3"), Endpoint::new(THIRD, "did_R3")),
        (Endpoint::new(HOST, "did_S4"), Endpoint::new(SECOND, "did_R4")),
    ];

    let mut identities = Vec::with_capacity(pairs.len() * 2);
    let mut introductions = Vec::new();
    let mut steps = Vec::with_capacity(pairs.len() * 3);
    for (sender, receiver) in &pairs {
        identities.push(identity(sender, DidKind::Lite, false));
        identities.push(identity(receiver, DidKind::Lite, false));
        if sender.node != receiver.node {
            introductions.extend(mutual_introductions(sender, receiver));
        }
        steps.push(Step::pass(fund(sender, 1)));
        steps.push(Step::pass(transfer(sender, receiver, "1")));
        steps.push(Step::pass(transfer(receiver, sender, "1")));
    }

    ScenarioPlan {
        name: "quorum_did_same_srv".to_string(),
        snapshot_file: "multiple_quorum_on_same_srv.json".to_string(),
        topology: TopologyPlan {
            registry_key: "same_quorum".to_string(),
            family: NodeFamily::Primary,
            identities,
            bindings: [HOST, SECOND, THIRD]
                .iter()
                .map(|node| binding(node, &same_node.name))
                .collect(),
            quorum_groups: vec![same_node],
            introductions,
        },
        cases: vec![ScenarioCase {
            name: "all_quorums_on_same_node".to_string(),
            steps,
        }],
    }
}
