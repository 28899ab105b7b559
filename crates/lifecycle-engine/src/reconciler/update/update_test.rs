//! Unit tests for node updates

#[cfg(test)]
mod tests {
    use crate::error::EngineError;
    use crate::test_utils::{HOSTNAME, TestFabric, node_spec, snapshot};
    use cluster_node::NodeRoles;
    use node_config::{
        BladeAssigned, BladeSpec, MaintenanceSpec, MaintenanceTask, NodeSpec, PowerState, RestoreSpec, Taint,
    };
    use std::collections::BTreeMap;

    fn blade(cores: &str) -> Option<BladeSpec> {
        Some(BladeSpec {
            num_of_cores: cores.to_string(),
            ..Default::default()
        })
    }

    fn maintenance(tasks: Vec<MaintenanceTask>) -> Option<MaintenanceSpec> {
        Some(MaintenanceSpec {
            execute: true,
            tasks,
            wait_for_node_timeout: 60,
            ..Default::default()
        })
    }

    fn reimaged(spec: &NodeSpec) -> NodeSpec {
        let mut new = spec.clone();
        new.storage.boot_lun.os_image = "ubuntu-24.04".to_string();
        new
    }

    #[tokio::test]
    async fn test_noop_update() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        let old = node_spec();
        let mut new = node_spec();

        let outcome = fabric.reconciler().update(&old, &mut new).await.unwrap();

        assert!(!outcome.changes.any());
        assert!(outcome.config.is_some());
        assert!(!fabric.journal.contains("compute.set_power_state"));
        assert!(!fabric.journal.contains("cluster.node_set_annotations_labels_taints"));
    }

    #[tokio::test]
    async fn test_update_missing_server() {
        let fabric = TestFabric::new();
        let mut new = node_spec();
        let err = fabric.reconciler().update(&node_spec(), &mut new).await.unwrap_err();
        assert_eq!(err.to_string(), "Validation error: server node1 not found");
    }

    #[tokio::test]
    async fn test_blade_in_range_is_not_reassigned() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        let mut new = node_spec();
        // assigned blade has 36 cores
        new.compute.blade_spec = blade("32-40");

        let outcome = fabric.reconciler().update(&node_spec(), &mut new).await.unwrap();

        assert!(!outcome.changes.blade_spec);
        assert!(!fabric.journal.contains("compute.update_server"));
    }

    #[tokio::test]
    async fn test_first_blade_spec_pins_assigned_blade() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        let current = BladeAssigned {
            spec: BladeSpec {
                dn: "sys/chassis-2/blade-4".to_string(),
                model: "UCSB-B200-M5 (refurb)".to_string(),
                num_of_cpus: "2".to_string(),
                num_of_cores: "36".to_string(),
                num_of_threads: "72".to_string(),
                total_memory: "262144".to_string(),
            },
            serial: "FCH0000042".to_string(),
        };
        fabric.compute.set_blade(HOSTNAME, current.clone());
        let old = node_spec();
        assert!(old.compute.blade_spec.is_none());
        let mut new = old.clone();
        // declaring the blade the node already has is not a change
        new.compute.blade_spec = Some(BladeSpec::from_assigned(&current));

        let outcome = fabric.reconciler().update(&old, &mut new).await.unwrap();

        assert!(!outcome.changes.blade_spec);
        assert!(!fabric.journal.contains("compute.update_server"));
        assert!(!fabric.journal.contains("compute.set_power_state"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blade_reassignment_power_cycles() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        let mut new = node_spec();
        new.compute.blade_spec = blade("48-64");

        let outcome = fabric.reconciler().update(&node_spec(), &mut new).await.unwrap();

        assert!(outcome.changes.blade_spec);
        assert!(!outcome.changes.power_state);
        assert!(fabric.pos("compute.update_server_preflight") < fabric.pos("cluster.node_cordon_drain"));
        assert!(fabric.pos("cluster.node_cordon_drain") < fabric.pos("compute.set_power_state(down)"));
        assert!(fabric.pos("compute.set_power_state(down)") < fabric.pos("compute.update_server"));
        assert!(fabric.pos("compute.update_server") < fabric.pos("compute.set_power_state(up)"));
        assert!(fabric.pos("compute.set_power_state(up)") < fabric.pos("cluster.node_uncordon"));
        assert!(fabric.pos("cluster.node_uncordon") < fabric.pos("cluster.cluster_wait_for_state(active)"));
        // new blade is published on the node
        assert!(fabric.journal.contains("cluster.node_set_annotations_labels_taints"));
        assert_eq!(fabric.compute.server(HOSTNAME).unwrap().power, PowerState::Up);
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_on() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Down);
        let mut old = node_spec();
        old.compute.powerstate = PowerState::Down;
        let mut new = node_spec();

        let outcome = fabric.reconciler().update(&old, &mut new).await.unwrap();

        assert!(outcome.changes.power_state);
        assert!(!fabric.journal.contains("compute.set_power_state(down)"));
        assert!(fabric.pos("compute.set_power_state(up)") < fabric.pos("shell.run(uname -a)"));
        assert_eq!(outcome.config.unwrap().compute.power_state, PowerState::Up);
    }

    #[tokio::test]
    async fn test_power_off_refused_with_safe_removal() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        let mut new = node_spec();
        new.compute.safe_removal = true;
        new.compute.powerstate = PowerState::Down;

        let err = fabric.reconciler().update(&node_spec(), &mut new).await.unwrap_err();

        assert!(err.to_string().contains("safe_removal is set"), "{err}");
        assert!(!fabric.journal.contains("compute.set_power_state"));
        assert!(!fabric.journal.contains("cluster.node_cordon_drain"));
        assert!(!fabric.journal.contains("shell.run"));
        assert_eq!(fabric.compute.server(HOSTNAME).unwrap().power, PowerState::Up);
    }

    #[tokio::test]
    async fn test_compute_failure_refreshes_and_stops() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        fabric.compute.fail_on("update_server_preflight", "no blade available");
        let mut new = reimaged(&node_spec());
        new.compute.blade_spec = blade("48-64");

        let err = fabric.reconciler().update(&node_spec(), &mut new).await.unwrap_err();

        assert!(err.to_string().contains("no blade available"));
        // observed state was re-read, storage was left alone
        assert!(fabric.journal.contains("storage.discover_boot_storage"));
        assert!(!fabric.journal.contains("storage.delete_boot_luns"));
    }

    #[tokio::test]
    async fn test_attribute_update() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        let mut new = node_spec();
        new.compute.description = "rack 4".to_string();

        fabric.reconciler().update(&node_spec(), &mut new).await.unwrap();

        assert!(fabric.journal.contains("compute.update_server_attributes"));
        assert_eq!(fabric.compute.server(HOSTNAME).unwrap().description, "rack 4");
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_order() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        fabric.storage.add_snapshot("node1_iboot", "a");
        let mut old = node_spec();
        old.snapshots = vec![snapshot("a", false)];
        let mut new = reimaged(&old);
        new.snapshots = vec![snapshot("b", false)];
        new.labels = BTreeMap::from([("zone".to_string(), "a".to_string())]);

        let outcome = fabric.reconciler().update(&old, &mut new).await.unwrap();

        let order = [
            "storage.delete_snapshot(a)",
            "storage.create_snapshot(b)",
            "cluster.node_cordon_drain",
            "compute.set_power_state(down)",
            "storage.delete_boot_luns",
            "storage.create_boot_storage",
            "storage.create_seed_storage",
            "compute.set_power_state(up)",
            "cluster.node_uncordon",
            "cluster.node_wait_for_state(active)",
            "cluster.node_update_labels",
            "cluster.node_set_annotations_labels_taints",
        ];
        for pair in order.windows(2) {
            assert!(fabric.pos(pair[0]) < fabric.pos(pair[1]), "{} before {}", pair[0], pair[1]);
        }
        let changes = outcome.changes;
        assert!(changes.os_image && !changes.seed_template);
        assert!(changes.snapshot_create && changes.snapshot_delete);
        let volume = fabric.storage.volume("node1_iboot").unwrap();
        assert_eq!(volume.os_image, "ubuntu-24.04");
        assert_eq!(volume.snapshots, vec!["b"]);
        assert_eq!(fabric.node.labels().unwrap().get("zone").map(String::as_str), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_update_is_one_shot() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Down);
        let mut old = node_spec();
        old.compute.powerstate = PowerState::Down;
        let mut new = old.clone();
        new.storage.force_update = true;
        new.storage.auto_snapshot_on_update = true;

        let outcome = fabric.reconciler().update(&old, &mut new).await.unwrap();

        assert!(outcome.changes.os_image && outcome.changes.seed_template);
        assert!(!new.storage.force_update);
        let volume = fabric.storage.volume("node1_iboot").unwrap();
        assert_eq!(volume.snapshots.len(), 1);
        assert!(volume.snapshots[0].starts_with("terraform:ubuntu-22.04:ubuntu.tmpl-"));
        assert!(fabric.journal.position("storage.create_snapshot(").unwrap() < fabric.pos("storage.delete_boot_luns"));
        // re-imaged but left off
        assert!(!fabric.journal.contains("compute.set_power_state"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_etcd_node_rejoins_implicitly() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        fabric.node.set_roles(NodeRoles {
            etcd: true,
            ..NodeRoles::default()
        });
        let old = node_spec();
        let mut new = reimaged(&old);

        fabric.reconciler().update(&old, &mut new).await.unwrap();

        assert!(fabric.pos("cluster.node_delete") < fabric.pos("compute.set_power_state(down)"));
        assert_eq!(fabric.journal.calls_matching("cluster.cluster_wait_for_transitioning").len(), 2);
        assert!(!fabric.journal.contains("cluster.node_cordon_drain"));
        assert!(!fabric.journal.contains("cluster.node_uncordon"));
        assert!(fabric.pos("compute.set_power_state(up)") < fabric.pos("cluster.node_wait_for_state(active)"));

        // the re-registered node is looked up again once the cluster settles
        let calls = fabric.calls();
        let last_transition = calls
            .iter()
            .rposition(|c| c == "cluster.cluster_wait_for_transitioning")
            .unwrap();
        let refresh = fabric.pos("cluster.node_refresh_id");
        assert!(last_transition < refresh);
        assert!(refresh < fabric.pos("cluster.node_wait_for_state(active)"));
        assert_eq!(fabric.journal.calls_matching("cluster.node_refresh_id").len(), 1);
    }

    #[tokio::test]
    async fn test_reimage_refused_with_safe_removal() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        let mut old = node_spec();
        old.compute.safe_removal = true;
        let mut new = reimaged(&old);

        let err = fabric.reconciler().update(&old, &mut new).await.unwrap_err();

        assert!(err.to_string().starts_with("update storage: "), "{err}");
        assert!(!fabric.journal.contains("storage.delete_boot_luns"));
        assert!(!fabric.journal.contains("compute.set_power_state"));
    }

    #[tokio::test]
    async fn test_reimage_preflight_failure() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        fabric.storage.fail_on("create_boot_storage_preflight", "image not in repository");
        let mut new = reimaged(&node_spec());

        let err = fabric.reconciler().update(&node_spec(), &mut new).await.unwrap_err();

        assert!(err.to_string().contains("image not in repository"));
        assert!(!fabric.journal.contains("cluster.node_cordon_drain"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_poisoned_by_failed_update() {
        let fabric = TestFabric::synchronized();
        fabric.existing_node(PowerState::Up);
        let mut old = node_spec();
        old.compute.safe_removal = true;
        let mut new = reimaged(&old);
        fabric.reconciler().update(&old, &mut new).await.unwrap_err();

        let mut power_off = node_spec();
        power_off.compute.powerstate = PowerState::Down;
        let err = fabric.reconciler().update(&node_spec(), &mut power_off).await.unwrap_err();

        let EngineError::Poisoned(previous) = &err else {
            panic!("expected poisoned gate, got {err}");
        };
        assert!(previous.contains("safe_removal is set"));
        assert!(!fabric.journal.contains("compute.set_power_state"));

        fabric.ctx.gate.reset().await;
        fabric.reconciler().update(&node_spec(), &mut power_off).await.unwrap();
        assert_eq!(fabric.compute.server(HOSTNAME).unwrap().power, PowerState::Down);
    }

    #[tokio::test]
    async fn test_disk_resize() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        let old = node_spec();
        let mut new = node_spec();
        new.storage.boot_lun.size = 30;
        new.compute.ssh_node_bootdisk_resize_commands = vec!["sudo growpart /dev/sda 1".to_string()];
        new.compute.ssh_node_datadisk_resize_commands = vec!["sudo resize2fs /dev/sdb".to_string()];

        let outcome = fabric.reconciler().update(&old, &mut new).await.unwrap();

        assert!(outcome.changes.boot_disk_size);
        assert!(!outcome.changes.data_disk_size);
        assert!(fabric.pos("storage.resize_boot_storage") < fabric.pos("shell.run(sudo growpart /dev/sda 1)"));
        assert!(!fabric.journal.contains("shell.run(sudo resize2fs"));
        assert_eq!(fabric.storage.volume("node1_iboot").unwrap().boot_size, 30);
    }

    #[tokio::test]
    async fn test_disk_shrink_rejected() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        let mut new = node_spec();
        new.storage.boot_lun.size = 10;

        let err = fabric.reconciler().update(&node_spec(), &mut new).await.unwrap_err();

        assert!(matches!(err, EngineError::Validation(_)));
        assert!(!fabric.journal.contains("storage.resize_boot_storage"));
    }

    #[tokio::test]
    async fn test_snapshot_set_changes() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        fabric.storage.add_snapshot("node1_iboot", "a");
        fabric.storage.add_snapshot("node1_iboot", "b");
        let mut old = node_spec();
        old.snapshots = vec![snapshot("a", false), snapshot("b", false)];
        let mut new = node_spec();
        new.snapshots = vec![snapshot("b", false), snapshot("c", false)];

        fabric.reconciler().update(&old, &mut new).await.unwrap();

        assert_eq!(
            fabric.journal.calls_matching("storage.").into_iter().filter(|c| c.contains("snapshot")).collect::<Vec<_>>(),
            vec!["storage.delete_snapshot(a)", "storage.create_snapshot(c)"]
        );
        assert_eq!(fabric.storage.volume("node1_iboot").unwrap().snapshots, vec!["b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_latest_snapshot() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        for name in [
            "terraform:ubuntu-20.04:seed-2024-03-05T10:20:30-00:00",
            "terraform:ubuntu-22.04:seed-2024-06-01T08:00:00-00:00",
            "manual",
        ] {
            fabric.storage.add_snapshot("node1_iboot", name);
        }
        let mut new = node_spec();
        new.restore = Some(RestoreSpec {
            restore: true,
            snapshot_name: String::new(),
        });

        let outcome = fabric.reconciler().update(&node_spec(), &mut new).await.unwrap();

        assert!(outcome.changes.snapshot_restore);
        assert!(!new.restore.as_ref().unwrap().restore);
        assert_eq!(
            fabric.storage.volume("node1_iboot").unwrap().restored_from.as_deref(),
            Some("terraform:ubuntu-22.04:seed-2024-06-01T08:00:00-00:00")
        );
        assert!(fabric.pos("compute.set_power_state(down)") < fabric.pos("storage.lun_restore_mapping"));
        assert!(fabric.pos("storage.lun_restore_mapping") < fabric.pos("compute.set_power_state(up)"));
        assert!(fabric.journal.contains("cluster.node_set_annotations_labels_taints"));
    }

    #[tokio::test]
    async fn test_restore_without_timestamped_snapshot() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Down);
        fabric.storage.add_snapshot("node1_iboot", "manual");
        let mut old = node_spec();
        old.compute.powerstate = PowerState::Down;
        let mut new = old.clone();
        new.restore = Some(RestoreSpec {
            restore: true,
            snapshot_name: String::new(),
        });

        let err = fabric.reconciler().update(&old, &mut new).await.unwrap_err();

        assert_eq!(err.to_string(), "Snapshot error: snapshot not found, expected snapshot_name");
        assert!(new.restore.unwrap().restore);
    }

    #[tokio::test]
    async fn test_labels_and_taints() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        let mut new = node_spec();
        new.labels = BTreeMap::from([("rack".to_string(), "r1".to_string())]);
        new.taints = vec![Taint {
            key: "dedicated".to_string(),
            value: "gpu".to_string(),
            effect: "NoSchedule".to_string(),
        }];

        fabric.reconciler().update(&node_spec(), &mut new).await.unwrap();

        assert!(fabric.pos("cluster.node_update_labels") < fabric.pos("cluster.node_update_taints"));
        assert_eq!(fabric.node.labels().unwrap().len(), 1);
        assert_eq!(fabric.node.taints().unwrap(), new.taints);
        assert!(fabric.journal.contains("cluster.connect(wait=true)"));
    }

    #[tokio::test]
    async fn test_maintenance_drain() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        let mut new = node_spec();
        new.maintenance = maintenance(vec![MaintenanceTask::Drain]);

        fabric.reconciler().update(&node_spec(), &mut new).await.unwrap();

        assert!(
            fabric.pos("cluster.node_cordon_drain") < fabric.pos("cluster.node_wait_for_state(cordoned,drained)")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_restart_without_ssh() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        let mut old = node_spec();
        old.compute.ssh_user.clear();
        let mut new = old.clone();
        new.maintenance = maintenance(vec![MaintenanceTask::Restart]);

        fabric.reconciler().update(&old, &mut new).await.unwrap();

        assert!(fabric.pos("compute.set_power_state(down)") < fabric.pos("compute.set_power_state(up)"));
        assert!(!fabric.journal.contains("shell.run"));
        assert!(fabric.journal.contains("cluster.node_wait_for_state(cordoned,drained,active)"));
    }

    #[tokio::test]
    async fn test_maintenance_skipped_when_powered_off() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Down);
        let mut old = node_spec();
        old.compute.powerstate = PowerState::Down;
        let mut new = old.clone();
        new.maintenance = maintenance(vec![MaintenanceTask::Cordon]);

        fabric.reconciler().update(&old, &mut new).await.unwrap();

        assert!(!fabric.journal.contains("cluster.node_cordon"));
    }

    #[tokio::test]
    async fn test_maintenance_not_executed() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        let mut new = node_spec();
        new.maintenance = maintenance(vec![MaintenanceTask::Cordon]);
        if let Some(m) = new.maintenance.as_mut() {
            m.execute = false;
        }

        fabric.reconciler().update(&node_spec(), &mut new).await.unwrap();

        assert!(!fabric.journal.contains("cluster.node_cordon"));
    }
}
