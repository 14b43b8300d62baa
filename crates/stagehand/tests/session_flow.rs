//! End-to-end flows against the fake engine: plugin lifecycle, addressing,
//! preset selection and MIDI learn.

mod support;

use pretty_assertions::assert_eq;
use stagehand::PluginCatalog;
use stageproto::EngineEvent;
use support::rig;

#[tokio::test]
async fn test_add_address_remove_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path()).await;

    let ok = rig
        .session
        .add_plugin("/graph/gain_1", "urn:ex:gain", 10.0, 20.0)
        .await
        .unwrap();
    assert!(ok);
    assert_eq!(
        rig.engine.commands(),
        vec!["add urn:ex:gain 0", "monitor_output 0 level"]
    );

    let ok = rig
        .session
        .address(
            "/graph/gain_1",
            ":bypass",
            "/hmi/footswitch1",
            "Bypass",
            0.0,
            1.0,
            0.0,
            2,
            false,
        )
        .await
        .unwrap();
    assert!(ok);

    // the binding landed in the footswitch ring and was pushed to the HMI
    let ring = rig.session.addressings().ring("/hmi/footswitch1").unwrap();
    assert_eq!(ring.addrs.len(), 1);
    assert!(rig
        .hmi_log
        .lock()
        .unwrap()
        .iter()
        .any(|entry| entry.starts_with("control_add 0 :bypass")));

    // no MIDI learn was requested, so no midi_map reached the engine
    assert!(!rig
        .engine
        .commands()
        .iter()
        .any(|cmd| cmd.starts_with("midi_map")));

    rig.engine.clear_commands();
    let ok = rig.session.remove_plugin("/graph/gain_1").await.unwrap();
    assert!(ok);
    assert_eq!(rig.engine.commands(), vec!["remove 0"]);

    assert!(rig.session.plugins().is_empty());
    let ring = rig.session.addressings().ring("/hmi/footswitch1").unwrap();
    assert!(ring.addrs.is_empty());

    let log = rig.hmi_log.lock().unwrap();
    assert!(log.iter().any(|entry| entry.starts_with("control_clean")));
    assert!(log.iter().any(|entry| entry == "control_rm 0 :all"));
}

#[tokio::test]
async fn test_addressings_match_rings_after_churn() {
    // the multiset of addressings on plugins always equals the rings'
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path()).await;

    rig.session
        .add_plugin("/graph/gain_1", "urn:ex:gain", 0.0, 0.0)
        .await
        .unwrap();
    rig.session
        .add_plugin("/graph/delay_1", "urn:ex:delay", 0.0, 0.0)
        .await
        .unwrap();

    for (instance, port, actuator) in [
        ("/graph/gain_1", "gain", "/hmi/knob1"),
        ("/graph/delay_1", "time", "/hmi/knob1"),
        ("/graph/delay_1", "sync", "/hmi/footswitch2"),
        ("/graph/gain_1", ":bypass", "/hmi/footswitch1"),
    ] {
        let ok = rig
            .session
            .address(instance, port, actuator, port, 0.0, 1.0, 0.0, 33, false)
            .await
            .unwrap();
        assert!(ok, "failed to address {}/{}", instance, port);
    }

    let check_invariant = |session: &stagehand::Session| {
        let mut from_plugins: Vec<_> = session
            .plugins()
            .values()
            .flat_map(|plugin| plugin.addressings.values().copied())
            .collect();
        from_plugins.sort();
        assert_eq!(from_plugins, session.addressings().all_ids());
    };
    check_invariant(&rig.session);

    // re-address gain onto another knob (implicit unaddress from knob1)
    rig.session
        .address("/graph/gain_1", "gain", "/hmi/knob2", "gain", 0.0, 1.0, 0.0, 33, false)
        .await
        .unwrap();
    check_invariant(&rig.session);

    // unaddress via the null URI
    rig.session
        .address("/graph/delay_1", "sync", "null", "sync", 0.0, 1.0, 0.0, 2, false)
        .await
        .unwrap();
    check_invariant(&rig.session);

    // plugin removal cascades
    rig.session.remove_plugin("/graph/delay_1").await.unwrap();
    check_invariant(&rig.session);

    assert_eq!(rig.session.addressings().all_ids().len(), 2);
}

#[tokio::test]
async fn test_bypass_tracks_enabled_designation() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path()).await;

    rig.session
        .add_plugin("/graph/gain_1", "urn:ex:gain", 0.0, 0.0)
        .await
        .unwrap();

    rig.session.bypass("/graph/gain_1", true).await.unwrap();
    let plugin = rig.session.plugin_by_instance("/graph/gain_1").unwrap();
    assert_eq!(plugin.ports.get("enabled"), Some(&0.0));
    assert!(plugin.bypassed);

    rig.session.bypass("/graph/gain_1", false).await.unwrap();
    let plugin = rig.session.plugin_by_instance("/graph/gain_1").unwrap();
    assert_eq!(plugin.ports.get("enabled"), Some(&1.0));

    // the designated port is refused for direct writes
    let ok = rig
        .session
        .param_set("/graph/gain_1/enabled", 0.5)
        .await
        .unwrap();
    assert!(!ok);
    let plugin = rig.session.plugin_by_instance("/graph/gain_1").unwrap();
    assert_eq!(plugin.ports.get("enabled"), Some(&1.0));
}

#[tokio::test]
async fn test_preset_enumeration_and_selection() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path()).await;
    rig.engine.set_response("preset_show", "gain 1.5");

    rig.session
        .add_plugin("/graph/gain_1", "urn:ex:gain", 0.0, 0.0)
        .await
        .unwrap();

    let ok = rig
        .session
        .address(
            "/graph/gain_1",
            ":presets",
            "/hmi/knob1",
            "Preset",
            0.0,
            0.0,
            0.0,
            3,
            false,
        )
        .await
        .unwrap();
    assert!(ok);

    let plugin = rig.session.plugin_by_instance("/graph/gain_1").unwrap();
    assert_eq!(
        plugin.map_presets,
        vec!["urn:ex:gain:soft", "urn:ex:gain:mid", "urn:ex:gain:loud"]
    );
    // no preset was selected, so the first one got forced and loaded
    assert_eq!(plugin.preset, "urn:ex:gain:soft");
    assert!(rig
        .engine
        .commands()
        .contains(&"preset_load 0 urn:ex:gain:soft".to_string()));

    let ring = rig.session.addressings().ring("/hmi/knob1").unwrap();
    let addressing = rig.session.addressings().get(ring.addrs[0]).unwrap();
    assert_eq!(addressing.maximum, 3.0);
    assert_eq!(addressing.options.len(), 3);

    // select preset 2 from the surface
    let mut messages = rig.session.broadcaster().subscribe();
    let reply = rig
        .session
        .dispatch_hmi(stagehand::HmiRequest::ControlSet {
            instance_id: 0,
            symbol: ":presets".to_string(),
            value: 2.0,
        })
        .await;
    assert!(reply.ok);

    let plugin = rig.session.plugin_by_instance("/graph/gain_1").unwrap();
    assert_eq!(plugin.preset, "urn:ex:gain:loud");
    assert!(rig
        .engine
        .commands()
        .contains(&"preset_load 0 urn:ex:gain:loud".to_string()));

    let mut saw_preset_msg = false;
    while let Ok(msg) = messages.try_recv() {
        if msg == "preset /graph/gain_1 urn:ex:gain:loud" {
            saw_preset_msg = true;
        }
    }
    assert!(saw_preset_msg);

    // out-of-range index mutates nothing
    let reply = rig
        .session
        .dispatch_hmi(stagehand::HmiRequest::ControlSet {
            instance_id: 0,
            symbol: ":presets".to_string(),
            value: 9.0,
        })
        .await;
    assert!(!reply.ok);
    let plugin = rig.session.plugin_by_instance("/graph/gain_1").unwrap();
    assert_eq!(plugin.preset, "urn:ex:gain:loud");
}

#[tokio::test]
async fn test_midi_learn_flow() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path()).await;

    rig.session
        .add_plugin("/graph/gain_1", "urn:ex:gain", 0.0, 0.0)
        .await
        .unwrap();
    rig.engine.clear_commands();

    let ok = rig
        .session
        .address(
            "/graph/gain_1",
            "gain",
            "/midi-learn",
            "Gain",
            -12.0,
            12.0,
            0.0,
            0,
            false,
        )
        .await
        .unwrap();
    assert!(ok);
    assert_eq!(rig.engine.commands(), vec!["midi_learn 0 gain -12 12"]);

    // the engine answers asynchronously once a controller moved
    rig.session
        .apply_engine_event(EngineEvent::MidiMapped {
            instance_id: 0,
            symbol: "gain".to_string(),
            channel: 1,
            controller: 27,
            value: 0.0,
            minimum: -12.0,
            maximum: 12.0,
        })
        .await;

    let plugin = rig.session.plugin_by_instance("/graph/gain_1").unwrap();
    let cc = plugin.midi_ccs.get("gain").unwrap();
    assert_eq!((cc.channel, cc.controller), (1, 27));
    assert_eq!((cc.minimum, cc.maximum), (-12.0, 12.0));
    assert_eq!(plugin.ports.get("gain"), Some(&0.0));
    assert!(rig.session.pedalboard_modified());
}

#[tokio::test]
async fn test_ring_navigation_via_hmi() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path()).await;

    rig.session
        .add_plugin("/graph/delay_1", "urn:ex:delay", 0.0, 0.0)
        .await
        .unwrap();

    for port in ["time", "sync", "division"] {
        rig.session
            .address("/graph/delay_1", port, "/hmi/knob1", port, 0.0, 1.0, 0.0, 33, false)
            .await
            .unwrap();
    }

    let idx_of = |session: &stagehand::Session| session.addressings().ring("/hmi/knob1").unwrap().idx;
    let start = idx_of(&rig.session);

    let request = stagehand::HmiRequest::parse("control_next 0 0 2 0").unwrap();
    for _ in 0..3 {
        let reply = rig.session.dispatch_hmi(request.clone()).await;
        assert!(reply.ok);
    }
    assert_eq!(idx_of(&rig.session), start);

    let prev = stagehand::HmiRequest::parse("control_prev 0 0 2 0").unwrap();
    rig.session.dispatch_hmi(prev).await;
    assert_eq!(idx_of(&rig.session), (start + 2) % 3);
}

#[tokio::test]
async fn test_connections_are_idempotent_and_best_effort() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path()).await;

    rig.session
        .add_plugin("/graph/gain_1", "urn:ex:gain", 0.0, 0.0)
        .await
        .unwrap();
    rig.engine.clear_commands();

    let ok = rig
        .session
        .connect("/graph/capture_1", "/graph/gain_1/in")
        .await
        .unwrap();
    assert!(ok);
    assert_eq!(
        rig.engine.commands(),
        vec!["connect system:capture_1 effect_0:in"]
    );

    // a duplicate edge succeeds without reaching the engine again
    rig.engine.clear_commands();
    let ok = rig
        .session
        .connect("/graph/capture_1", "/graph/gain_1/in")
        .await
        .unwrap();
    assert!(ok);
    assert!(rig.engine.commands().is_empty());

    // disconnect drops the edge even when the engine says no
    rig.engine.set_response("disconnect", "resp -1");
    let ok = rig
        .session
        .disconnect("/graph/capture_1", "/graph/gain_1/in")
        .await
        .unwrap();
    assert!(ok);
    assert!(rig.session.connections().is_empty());
}

#[tokio::test]
async fn test_snapshot_mirrors_full_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path()).await;

    rig.session
        .add_plugin("/graph/gain_1", "urn:ex:gain", 10.0, 20.0)
        .await
        .unwrap();
    rig.session
        .connect("/graph/capture_1", "/graph/gain_1/in")
        .await
        .unwrap();
    rig.session
        .apply_engine_event(EngineEvent::OutputSet {
            instance_id: 0,
            symbol: "level".to_string(),
            value: -18.0,
        })
        .await;

    let messages = rig.session.snapshot_messages();

    assert!(messages.iter().any(|m| m.starts_with("stats ")));
    assert!(messages.contains(&"add /graph/gain_1 urn:ex:gain 10.0 20.0 0".to_string()));
    assert!(messages.contains(&"param_set /graph/gain_1 gain 0".to_string()));
    assert!(messages.contains(&"output_set /graph/gain_1 level -18".to_string()));
    assert!(messages.contains(&"connect /graph/capture_1 /graph/gain_1/in".to_string()));
    assert_eq!(messages.last().unwrap(), "loading_end");
}

#[tokio::test]
async fn test_ui_session_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path()).await;

    rig.session.ui_connected().await;
    assert!(rig
        .engine
        .commands()
        .contains(&"midi_program_listen 0 -1".to_string()));
    {
        let log = rig.hmi_log.lock().unwrap();
        assert!(log.iter().any(|entry| entry == "ui_con"));
        // empty bank footswitch rings get blanked while the editor drives
        assert!(log.iter().filter(|entry| entry.starts_with("control_clean")).count() >= 2);
    }

    rig.session.ui_disconnected().await;
    let log = rig.hmi_log.lock().unwrap();
    assert!(log.iter().any(|entry| entry == "ui_dis"));
    assert!(log.iter().any(|entry| entry.starts_with("initial_state")));
}

#[tokio::test]
async fn test_preset_save_new_registers_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path()).await;

    rig.session
        .add_plugin("/graph/gain_1", "urn:ex:gain", 0.0, 0.0)
        .await
        .unwrap();
    rig.engine.clear_commands();

    let saved = rig
        .session
        .preset_save_new("/graph/gain_1", "My Tone")
        .await
        .unwrap()
        .expect("preset save should succeed");

    assert!(saved.bundle.ends_with("gain_1-My_Tone.lv2"));
    assert!(saved.uri.starts_with("file://"));
    assert!(saved.uri.ends_with("My_Tone.ttl"));

    let commands = rig.engine.commands();
    assert!(commands
        .iter()
        .any(|cmd| cmd.starts_with("preset_save 0 \"My Tone\"")));
    assert!(commands.iter().any(|cmd| cmd.starts_with("bundle_add")));
    assert!(rig.catalog.is_bundle_loaded(&saved.bundle));

    let plugin = rig.session.plugin_by_instance("/graph/gain_1").unwrap();
    assert_eq!(plugin.preset, saved.uri);
}

#[tokio::test]
async fn test_bundle_management_rejections() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path()).await;
    let bundle = dir.path().join("extra.lv2");
    std::fs::create_dir_all(&bundle).unwrap();

    // removing a bundle that was never added is refused
    let err = rig.session.remove_bundle(&bundle, false).await.unwrap_err();
    assert!(matches!(err, stagehand::SessionError::BundleNotLoaded(_)));

    rig.session.add_bundle(&bundle).await.unwrap();
    let err = rig.session.add_bundle(&bundle).await.unwrap_err();
    assert!(matches!(err, stagehand::SessionError::BundleAlreadyLoaded(_)));

    // a bundle whose plugin is loaded on the board cannot be removed
    std::fs::write(bundle.join("plugins.json"), r#"["urn:ex:gain"]"#).unwrap();
    rig.session
        .add_plugin("/graph/gain_1", "urn:ex:gain", 0.0, 0.0)
        .await
        .unwrap();
    let err = rig.session.remove_bundle(&bundle, true).await.unwrap_err();
    assert!(matches!(err, stagehand::SessionError::BundleInUse(_)));

    rig.session.remove_plugin("/graph/gain_1").await.unwrap();
    rig.session.remove_bundle(&bundle, true).await.unwrap();
}

#[tokio::test]
async fn test_tuner_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path()).await;

    let reply = rig
        .session
        .dispatch_hmi(stagehand::HmiRequest::parse("tuner on").unwrap())
        .await;
    assert!(reply.ok);

    let commands = rig.engine.commands();
    assert!(commands.contains(&"add http://gareus.org/oss/lv2/tuna#one 9994".to_string()));
    assert!(commands.contains(&"monitor_output 9994 freq_out".to_string()));
    assert!(rig
        .router
        .connections()
        .contains(&("system:capture_1".to_string(), "effect_9994:in".to_string())));

    // frequency readings reach the surface as note + cents
    rig.session
        .apply_engine_event(EngineEvent::OutputSet {
            instance_id: 9994,
            symbol: "freq_out".to_string(),
            value: 440.0,
        })
        .await;
    assert!(rig
        .hmi_log
        .lock()
        .unwrap()
        .iter()
        .any(|entry| entry == "tuner 440 A4 0"));

    // the capture port can only swap between inputs 1 and 2
    let reply = rig
        .session
        .dispatch_hmi(stagehand::HmiRequest::parse("tuner_input 2").unwrap())
        .await;
    assert!(reply.ok);
    let reply = rig
        .session
        .dispatch_hmi(stagehand::HmiRequest::parse("tuner_input 3").unwrap())
        .await;
    assert!(!reply.ok);

    rig.engine.clear_commands();
    let reply = rig
        .session
        .dispatch_hmi(stagehand::HmiRequest::parse("tuner off").unwrap())
        .await;
    assert!(reply.ok);
    assert_eq!(rig.engine.commands(), vec!["remove 9994"]);
}
