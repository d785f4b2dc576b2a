//! Scenario tests against the fake deployment.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::{FakeNetwork, UNITS_PER_RBT};
use rubix_harness::quorum::QuorumMembership;
use rubix_harness::scenario::{
    catalog, Action, IdentitySpec, Introduction, QuorumBinding, ScenarioCase, ScenarioPlan, Step,
    TopologyPlan,
};
use rubix_harness::topology::{load_json, IdentityStatus, NodeStatus};
use rubix_harness::{
    DidKind, Endpoint, Error, Harness, HarnessOptions, NodeFamily, NodePorts, Provisioner,
    RbtAmount, TopologySnapshot,
};
use std::path::PathBuf;

/// Quorum nodes plus the two secondary-family nodes of `non_quorum`.
const SLOTS: [u16; 7] = [0, 1, 2, 3, 4, 14, 15];

fn setup_registry(network: &FakeNetwork) {
    network.write_registry(&[("quorum", &[0, 1, 2, 3, 4]), ("non_quorum", &[4, 5])]);
}

fn skip_build() -> HarnessOptions {
    HarnessOptions {
        skip_prerequisite: true,
        ..HarnessOptions::default()
    }
}

fn transfer(from: &Endpoint, to: &Endpoint, amount: &str) -> Action {
    Action::Transfer {
        from: from.clone(),
        to: to.clone(),
        amount: RbtAmount::parse(amount).unwrap(),
    }
}

/// Two identities on `nodeNq14`/`nodeNq15` plus an unfunded one next to B.
fn pair_plan(cases: Vec<ScenarioCase>) -> ScenarioPlan {
    let a = Endpoint::new("nodeNq14", "did_a");
    let b = Endpoint::new("nodeNq15", "did_b");
    let c = Endpoint::new("nodeNq15", "did_c");
    let spec = |e: &Endpoint| IdentitySpec {
        node: e.node.clone(),
        alias: e.alias.clone(),
        kind: DidKind::Lite,
        register: true,
    };

    ScenarioPlan {
        name: "pair".to_string(),
        snapshot_file: "pair_config.json".to_string(),
        topology: TopologyPlan {
            registry_key: "non_quorum".to_string(),
            family: NodeFamily::Secondary,
            identities: vec![spec(&a), spec(&b), spec(&c)],
            quorum_groups: Vec::new(),
            bindings: ["nodeNq14", "nodeNq15"]
                .iter()
                .map(|node| QuorumBinding {
                    node: (*node).to_string(),
                    group: "quorum".to_string(),
                })
                .collect(),
            introductions: vec![
                Introduction {
                    subject: b,
                    to_node: "nodeNq14".to_string(),
                },
                Introduction {
                    subject: a,
                    to_node: "nodeNq15".to_string(),
                },
            ],
        },
        cases,
    }
}

fn quorum_list(network: &FakeNetwork, file: &str) -> Vec<QuorumMembership> {
    load_json(&network.binary_dir().join(file)).unwrap().unwrap()
}

fn did_of(snapshot: &TopologySnapshot, node: &str, alias: &str) -> String {
    snapshot.node(node).unwrap().identity(alias).unwrap().did.clone()
}

/// The built-in transfer scenario passes end to end.
#[tokio::test]
async fn test_rbt_transfer_scenario_passes() {
    let network = FakeNetwork::start(&SLOTS).await;
    setup_registry(&network);
    let config = network.config();
    let harness = Harness::new(config.clone()).unwrap();

    let reports = harness
        .run(vec![catalog::rbt_transfer()], skip_build())
        .await
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].cases.len(), 3);
    assert_eq!(reports[0].cases[0].steps, 11);

    // Quorum group: five registered, funded quorum members.
    let quorum = TopologySnapshot::load(&config.state_path("quorum_config.json")).unwrap();
    assert_eq!(quorum.len(), 5);
    for node in quorum.nodes() {
        assert_eq!(node.status, NodeStatus::Running);
        assert!(node.peer_id.starts_with("12D3KooW"));
        let identity = node.identity("did_quorum").unwrap();
        assert_eq!(identity.status, IdentityStatus::Registered);
        assert!(identity.quorum_member);
        assert_eq!(identity.funded_tokens, 70);
        assert_eq!(network.balance_units(&identity.did), 70 * UNITS_PER_RBT);
    }

    let list: Vec<QuorumMembership> = load_json(&network.binary_dir().join("quorumlist.json"))
        .unwrap()
        .unwrap();
    assert_eq!(list.len(), 5);
    assert!(list.iter().all(|m| m.kind == 2 && m.address.contains(".bafybmi")));

    // Scenario nodes: bound to the quorum and introduced to each other.
    let snapshot = TopologySnapshot::load(&config.state_path("non_quorum_config.json")).unwrap();
    assert_eq!(snapshot.names(), vec!["nodeNq14", "nodeNq15"]);
    let a = snapshot.node("nodeNq14").unwrap();
    assert_eq!(a.http_port, config.ports.http_base + 14);
    assert!(a.quorum_list.is_some());
    let did_a = did_of(&snapshot, "nodeNq14", "did_a");
    let did_b = did_of(&snapshot, "nodeNq15", "did_b");
    assert!(a.knows(&did_b));
    assert!(snapshot.node("nodeNq15").unwrap().knows(&did_a));

    // Shuttle leaves A empty and B with 4 RBT; every failing step was rejected.
    assert_eq!(network.balance_units(&did_a), 0);
    assert_eq!(network.balance_units(&did_b), 4 * UNITS_PER_RBT);
    assert_eq!(network.transfers().len(), 9);
}

/// Funding 2, sending 0.5 and 1.499 to B and receiving 0.25 three times
/// leaves A with 0.751 and B with 1.249.
#[tokio::test]
async fn test_transfer_balances_and_expected_failures() {
    let network = FakeNetwork::start(&SLOTS).await;
    setup_registry(&network);
    let config = network.config();
    let harness = Harness::new(config.clone()).unwrap();

    let a = Endpoint::new("nodeNq14", "did_a");
    let b = Endpoint::new("nodeNq15", "did_b");
    let c = Endpoint::new("nodeNq15", "did_c");
    let plan = pair_plan(vec![
        ScenarioCase {
            name: "five_transfers".to_string(),
            steps: vec![
                Step::pass(Action::Fund {
                    target: a.clone(),
                    tokens: 2,
                }),
                Step::pass(transfer(&a, &b, "0.5")),
                Step::pass(transfer(&a, &b, "1.499")),
                Step::pass(transfer(&b, &a, "0.25")),
                Step::pass(transfer(&b, &a, "0.25")),
                Step::pass(transfer(&b, &a, "0.25")),
                Step::pass(Action::AccountInfo { target: a.clone() }),
            ],
        },
        ScenarioCase {
            name: "rejected".to_string(),
            steps: vec![
                Step::fail(transfer(&b, &a, "0.000000009")),
                Step::fail(transfer(&c, &a, "1")),
            ],
        },
    ]);

    harness.run(vec![plan], skip_build()).await.unwrap();

    let snapshot = TopologySnapshot::load(&config.state_path("pair_config.json")).unwrap();
    let did_a = did_of(&snapshot, "nodeNq14", "did_a");
    let did_b = did_of(&snapshot, "nodeNq15", "did_b");
    let did_c = did_of(&snapshot, "nodeNq15", "did_c");
    assert_eq!(network.balance_units(&did_a), 75_100_000);
    assert_eq!(network.balance_units(&did_b), 124_900_000);
    assert_eq!(network.balance_units(&did_c), 0);
    assert_eq!(network.transfers().len(), 5);
    assert_eq!(
        snapshot.node("nodeNq14").unwrap().identity("did_a").unwrap().funded_tokens,
        2
    );
}

/// A step expected to fail that succeeds stops the run.
#[tokio::test]
async fn test_unexpected_success_is_reported() {
    let network = FakeNetwork::start(&SLOTS).await;
    setup_registry(&network);
    let harness = Harness::new(network.config()).unwrap();

    let a = Endpoint::new("nodeNq14", "did_a");
    let b = Endpoint::new("nodeNq15", "did_b");
    let plan = pair_plan(vec![ScenarioCase {
        name: "wrong_expectation".to_string(),
        steps: vec![
            Step::pass(Action::Fund {
                target: a.clone(),
                tokens: 1,
            }),
            Step::fail(transfer(&a, &b, "0.5")),
            Step::pass(transfer(&a, &b, "0.25")),
        ],
    }]);

    let err = harness.run(vec![plan], skip_build()).await.unwrap_err();
    assert!(matches!(err, Error::UnexpectedSuccess { .. }), "got {err}");
    // The step after the violation never ran.
    assert_eq!(network.transfers().len(), 1);
}

/// A step expected to pass that the binary rejects stops the run.
#[tokio::test]
async fn test_unexpected_failure_is_reported() {
    let network = FakeNetwork::start(&SLOTS).await;
    setup_registry(&network);
    let harness = Harness::new(network.config()).unwrap();

    let a = Endpoint::new("nodeNq14", "did_a");
    let b = Endpoint::new("nodeNq15", "did_b");
    let plan = pair_plan(vec![ScenarioCase {
        name: "unfunded".to_string(),
        steps: vec![Step::pass(transfer(&a, &b, "100"))],
    }]);

    let err = harness.run(vec![plan], skip_build()).await.unwrap_err();
    match err {
        Error::UnexpectedFailure { source, .. } => match *source {
            Error::CommandFailed { status, output, .. } => {
                assert_eq!(status, 1);
                assert!(output.contains("insufficient balance"));
            }
            other => panic!("unexpected source: {other}"),
        },
        other => panic!("unexpected error: {other}"),
    }
}

/// `run_tests_only` resumes from the persisted snapshot without provisioning.
#[tokio::test]
async fn test_run_tests_only_resumes_topology() {
    let network = FakeNetwork::start(&SLOTS).await;
    setup_registry(&network);
    let config = network.config();
    let harness = Harness::new(config.clone()).unwrap();

    let a = Endpoint::new("nodeNq14", "did_a");
    let b = Endpoint::new("nodeNq15", "did_b");
    let fund = pair_plan(vec![ScenarioCase {
        name: "fund".to_string(),
        steps: vec![Step::pass(Action::Fund {
            target: a.clone(),
            tokens: 3,
        })],
    }]);
    harness.run(vec![fund], skip_build()).await.unwrap();
    let created_before = std::fs::read_to_string(network.binary_dir().join("state/counter")).unwrap();

    let send = pair_plan(vec![ScenarioCase {
        name: "send".to_string(),
        steps: vec![Step::pass(transfer(&a, &b, "1.5"))],
    }]);
    let options = HarnessOptions {
        run_tests_only: true,
        ..HarnessOptions::default()
    };
    harness.run(vec![send], options).await.unwrap();

    let snapshot = TopologySnapshot::load(&config.state_path("pair_config.json")).unwrap();
    assert_eq!(
        network.balance_units(&did_of(&snapshot, "nodeNq14", "did_a")),
        150_000_000
    );
    // No identity was created on resume.
    let created_after = std::fs::read_to_string(network.binary_dir().join("state/counter")).unwrap();
    assert_eq!(created_before, created_after);
}

/// `run_nodes_only` starts every node but creates no identities.
#[tokio::test]
async fn test_run_nodes_only_then_shutdown() {
    let network = FakeNetwork::start(&SLOTS).await;
    setup_registry(&network);
    let config = network.config();
    let harness = Harness::new(config.clone()).unwrap();

    let options = HarnessOptions {
        skip_prerequisite: true,
        run_nodes_only: true,
        ..HarnessOptions::default()
    };
    let reports = harness
        .run(vec![catalog::rbt_transfer()], options)
        .await
        .unwrap();
    assert!(reports.is_empty());

    let quorum = TopologySnapshot::load(&config.state_path("quorum_config.json")).unwrap();
    assert_eq!(quorum.len(), 5);
    assert!(quorum.nodes().all(|n| n.identities.is_empty()));
    assert!(!network.binary_dir().join("quorumlist.json").exists());

    let path = config.state_path("non_quorum_config.json");
    let mut scenario = TopologySnapshot::load(&path).unwrap();
    assert_eq!(scenario.len(), 2);
    assert!(scenario.nodes().all(|n| n.status == NodeStatus::Running));

    let provisioner = Provisioner::new(config.clone()).unwrap();
    assert_eq!(provisioner.shutdown_all(&mut scenario).await, 2);
    scenario.save(&path).unwrap();

    let reloaded = TopologySnapshot::load(&path).unwrap();
    assert!(reloaded.nodes().all(|n| n.status == NodeStatus::Stopped));
    let mut ports = network.shutdown_ports();
    ports.sort_unstable();
    assert_eq!(
        ports,
        vec![config.ports.http_base + 14, config.ports.http_base + 15]
    );
}

/// A node whose readiness endpoint never answers times out.
#[tokio::test]
async fn test_readiness_timeout_aborts_provisioning() {
    // Listeners for the quorum only; slot 7 never answers.
    let network = FakeNetwork::start(&[0, 1, 2, 3, 4]).await;
    network.write_registry(&[("quorum", &[0, 1, 2, 3, 4]), ("silent", &[7])]);
    let mut config = network.config();
    config.readiness.timeout_secs = 1;
    let harness = Harness::new(config).unwrap();

    let mut plan = pair_plan(Vec::new());
    plan.topology.registry_key = "silent".to_string();
    plan.topology.family = NodeFamily::Primary;

    let err = harness.run(vec![plan], skip_build()).await.unwrap_err();
    assert!(matches!(err, Error::ReadinessTimeout { ref node, .. } if node == "node7"), "got {err}");
}

/// Two quorum groups: each scenario node transfers through its own group
/// and learns of the other node's identity only mid-run.
#[tokio::test]
async fn test_ping_peer_scenario_uses_second_quorum_group() {
    let network = FakeNetwork::start(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 18, 19]).await;
    network.write_registry(&[
        ("quorum", &[0, 1, 2, 3, 4]),
        ("quorum2", &[5, 6, 7, 8, 9]),
        ("ping_peer", &[18, 19]),
    ]);
    let config = network.config();
    let harness = Harness::new(config.clone()).unwrap();

    let reports = harness
        .run(vec![catalog::ping_peer()], skip_build())
        .await
        .unwrap();
    assert_eq!(reports[0].cases[0].steps, 14);

    let second = TopologySnapshot::load(&config.state_path("quorum_config2.json")).unwrap();
    assert_eq!(
        second.names(),
        vec!["node5", "node6", "node7", "node8", "node9"]
    );
    assert!(second
        .nodes()
        .all(|n| n.identity("did_quorum").unwrap().quorum_member));
    assert_eq!(quorum_list(&network, "quorumlist2.json").len(), 5);

    let snapshot = TopologySnapshot::load(&config.state_path("ping_peer_config.json")).unwrap();
    let node18 = snapshot.node("node18").unwrap();
    let node19 = snapshot.node("node19").unwrap();
    assert_eq!(node18.quorum_list, Some(PathBuf::from("quorumlist.json")));
    assert_eq!(node19.quorum_list, Some(PathBuf::from("quorumlist2.json")));
    for member in second.nodes() {
        let did = &member.identity("did_quorum").unwrap().did;
        assert!(node19.knows(did));
        assert!(!node18.knows(did));
    }

    // Introduced by the steps themselves.
    let did_a = did_of(&snapshot, "node18", "did_a");
    let did_b = did_of(&snapshot, "node19", "did_b");
    assert!(node18.knows(&did_b));
    assert!(node19.knows(&did_a));
    assert_eq!(
        node18.identity("did_a").unwrap().status,
        IdentityStatus::Created
    );

    assert_eq!(network.balance_units(&did_a), 225_000_000);
    assert_eq!(network.balance_units(&did_b), 275_000_000);
    assert_eq!(network.transfers().len(), 12);
}

/// Basic-mode identities carry their key passwords on every command that
/// needs them.
#[tokio::test]
async fn test_bip39_nlss_scenario_passes_basic_mode_secrets() {
    let network = FakeNetwork::start(&[0, 1, 2, 3, 4, 11, 12]).await;
    network.write_registry(&[("quorum", &[0, 1, 2, 3, 4]), ("bip39_nlss", &[11, 12])]);
    let config = network.config();
    let harness = Harness::new(config.clone()).unwrap();

    let reports = harness
        .run(vec![catalog::bip39_nlss()], skip_build())
        .await
        .unwrap();
    assert_eq!(reports[0].cases.len(), 2);

    let snapshot = TopologySnapshot::load(&config.state_path("bip39_nlss_config.json")).unwrap();
    let nlss = snapshot.node("node12").unwrap().identity("nlss_1").unwrap();
    assert_eq!(nlss.kind, DidKind::Basic);
    assert_eq!(nlss.status, IdentityStatus::Registered);
    let bip39 = did_of(&snapshot, "node11", "bip39_1");

    // 3 RBT go to the BIP39 identity and come back.
    assert_eq!(network.balance_units(&nlss.did), 3 * UNITS_PER_RBT);
    assert_eq!(network.balance_units(&bip39), 0);
    assert_eq!(network.transfers().len(), 6);
}

/// The fake binary refuses a basic-mode DID without passwords, so the
/// scenario above only passes if they are sent.
#[tokio::test]
async fn test_basic_mode_did_without_secrets_is_rejected() {
    let network = FakeNetwork::start(&[]).await;
    let provisioner = Provisioner::new(network.config()).unwrap();
    let ports = NodePorts {
        slot: 11,
        http: 20_011,
        rpc: 10_511,
    };

    let err = provisioner
        .launcher()
        .cli()
        .create_did(&ports, DidKind::Basic, None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::CommandFailed { ref output, .. } if output.contains("-privPWD")),
        "got {err}"
    );

    let did = provisioner
        .launcher()
        .cli()
        .create_did(&ports, DidKind::Basic, Some(&network.config().secrets))
        .await
        .unwrap();
    assert!(did.starts_with("bafybmi"));
}

/// Quorum identities hosted on a scenario node next to ordinary senders and
/// receivers, plus a scenario whose receiver is introduced mid-run.
#[tokio::test]
async fn test_same_server_quorum_and_periodic_pledging() {
    let network = FakeNetwork::start(&[0, 1, 2, 3, 4, 16, 17, 20, 21, 22]).await;
    network.write_registry(&[
        ("quorum", &[0, 1, 2, 3, 4]),
        ("periodic_pledging", &[16, 17]),
        ("same_quorum", &[20, 21, 22]),
    ]);
    let config = network.config();
    let harness = Harness::new(config.clone()).unwrap();

    let reports = harness
        .run(
            vec![catalog::periodic_pledging(), catalog::quorum_did_same_srv()],
            skip_build(),
        )
        .await
        .unwrap();
    assert_eq!(reports.len(), 2);

    let pledging = TopologySnapshot::load(&config.state_path("periodic_pledging.json")).unwrap();
    assert_eq!(network.balance_units(&did_of(&pledging, "node16", "did_a")), UNITS_PER_RBT);
    assert_eq!(network.balance_units(&did_of(&pledging, "node16", "did_a1")), 0);
    assert_eq!(
        network.balance_units(&did_of(&pledging, "node17", "did_b")),
        3 * UNITS_PER_RBT
    );

    let list = quorum_list(&network, "quorumlist_all_same_node.json");
    assert_eq!(list.len(), 7);
    assert!(list.iter().all(|m| m.kind == 2 && !m.address.contains('.')));

    let same = TopologySnapshot::load(&config.state_path("multiple_quorum_on_same_srv.json")).unwrap();
    let host = same.node("node20").unwrap();
    let quorum_dids: Vec<String> = (1..=7)
        .map(|n| {
            let identity = host.identity(&format!("did_q_{n}")).unwrap();
            assert!(identity.quorum_member);
            assert_eq!(network.balance_units(&identity.did), 20 * UNITS_PER_RBT);
            identity.did.clone()
        })
        .collect();
    for did in &quorum_dids {
        assert!(!host.knows(did));
        assert!(same.node("node21").unwrap().knows(did));
        assert!(same.node("node22").unwrap().knows(did));
    }
    assert!(same.nodes().all(|n| n.quorum_list
        == Some(PathBuf::from("quorumlist_all_same_node.json"))));

    for (node, alias) in [("node20", "did_S1"), ("node21", "did_S2"), ("node21", "did_S3"), ("node20", "did_S4")] {
        assert_eq!(network.balance_units(&did_of(&same, node, alias)), UNITS_PER_RBT);
    }
    // One transfer for pledging, eight for the same-server pairs.
    assert_eq!(network.transfers().len(), 9);
}
