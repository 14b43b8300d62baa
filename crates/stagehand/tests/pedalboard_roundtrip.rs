//! Save/load round-trips and MIDI hardware reconciliation.

mod support;

use std::collections::BTreeMap;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use stageproto::EngineEvent;
use support::{rig, rig_with_router, MockRouter};

#[tokio::test]
async fn test_save_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path()).await;
    rig.engine.set_response("preset_show", "gain 2.5");

    rig.session
        .add_plugin("/graph/gain_1", "urn:ex:gain", 10.0, 20.0)
        .await
        .unwrap();
    rig.session
        .add_plugin("/graph/delay_1", "urn:ex:delay", 30.0, 40.0)
        .await
        .unwrap();

    rig.session.bypass("/graph/delay_1", true).await.unwrap();
    rig.session
        .param_set("/graph/delay_1/time", 125.0)
        .await
        .unwrap();
    rig.session
        .preset_load("/graph/gain_1", "urn:ex:gain:mid")
        .await
        .unwrap();

    // a learned MIDI mapping and a mapped bypass arrive from the engine
    rig.session
        .apply_engine_event(EngineEvent::MidiMapped {
            instance_id: 0,
            symbol: "gain".to_string(),
            channel: 1,
            controller: 27,
            value: 2.5,
            minimum: -12.0,
            maximum: 12.0,
        })
        .await;
    rig.session
        .apply_engine_event(EngineEvent::MidiMapped {
            instance_id: 1,
            symbol: ":bypass".to_string(),
            channel: 0,
            controller: 64,
            value: 1.0,
            minimum: 0.0,
            maximum: 1.0,
        })
        .await;

    rig.session
        .connect("/graph/capture_1", "/graph/gain_1/in")
        .await
        .unwrap();
    rig.session
        .connect("/graph/gain_1/out", "/graph/delay_1/in")
        .await
        .unwrap();

    rig.session
        .address("/graph/gain_1", "gain", "/hmi/knob1", "Gain", -24.0, 24.0, 2.5, 33, false)
        .await
        .unwrap();
    rig.session
        .address(
            "/graph/delay_1",
            ":bypass",
            "/hmi/footswitch1",
            "Delay",
            0.0,
            1.0,
            1.0,
            2,
            false,
        )
        .await
        .unwrap();

    let saved = rig.session.save("Round Trip", false).await.unwrap();
    assert!(saved.ends_with("Round_Trip.pedalboard"));
    assert!(saved.join("manifest.ttl").exists());
    assert!(saved.join("Round_Trip.ttl").exists());
    assert!(saved.join("addressings.json").exists());
    assert!(!rig.session.pedalboard_modified());

    let old_plugins: BTreeMap<_, _> = rig
        .session
        .plugins()
        .values()
        .map(|plugin| {
            (
                plugin.instance.clone(),
                (
                    plugin.uri.clone(),
                    plugin.bypassed,
                    plugin.ports.clone(),
                    plugin.midi_ccs.clone(),
                    plugin.bypass_cc,
                    plugin.preset.clone(),
                ),
            )
        })
        .collect();
    let mut old_connections = rig.session.connections().to_vec();
    old_connections.sort();
    let old_addressings = rig.session.saved_addressings();

    // a brand-new session loads the bundle back
    let mut restored = support::rig(dir.path()).await;
    restored.session.load(&saved, false).await.unwrap();

    assert_eq!(restored.session.pedalboard_name(), "Round Trip");

    let new_plugins: BTreeMap<_, _> = restored
        .session
        .plugins()
        .values()
        .map(|plugin| {
            (
                plugin.instance.clone(),
                (
                    plugin.uri.clone(),
                    plugin.bypassed,
                    plugin.ports.clone(),
                    plugin.midi_ccs.clone(),
                    plugin.bypass_cc,
                    plugin.preset.clone(),
                ),
            )
        })
        .collect();
    assert_eq!(new_plugins, old_plugins);

    let mut new_connections = restored.session.connections().to_vec();
    new_connections.sort();
    assert_eq!(new_connections, old_connections);

    assert_eq!(restored.session.saved_addressings(), old_addressings);

    // the implicit whole-board Default preset snapshots every plugin
    let presets = restored.session.pedalboard_presets();
    assert_eq!(presets.len(), 1);
    assert_eq!(presets[0].name, "Default");
    assert_eq!(presets[0].data.len(), 2);
}

#[tokio::test]
async fn test_load_parks_connection_for_missing_midi_device() {
    let dir = tempfile::tempdir().unwrap();

    // session A has the Keystation attached and saves a board wired to it
    let router_a = Arc::new(MockRouter::new());
    router_a.add_midi_port("system:midi_capture_1", "in-hw-1-0-0-Keystation", false);
    let mut rig_a = rig_with_router(dir.path(), router_a).await;

    rig_a
        .session
        .set_midi_devices(&["system:midi_capture_1".to_string()]);
    assert_eq!(rig_a.session.midiports().len(), 1);

    rig_a
        .session
        .add_plugin("/graph/gain_1", "urn:ex:gain", 0.0, 0.0)
        .await
        .unwrap();
    rig_a
        .session
        .connect("/graph/midi_capture_1", "/graph/gain_1/in")
        .await
        .unwrap();

    let saved = rig_a.session.save("Pending", false).await.unwrap();

    // session B boots without the device: the edge is parked, not dropped
    let router_b = Arc::new(MockRouter::new());
    let mut rig_b = rig_with_router(dir.path(), router_b.clone()).await;
    rig_b.session.load(&saved, false).await.unwrap();

    assert!(rig_b.session.connections().is_empty());
    let record = &rig_b.session.midiports()[0];
    assert_eq!(record.alias, "Keystation");
    assert_eq!(
        record.pending_connections,
        vec![(
            "/graph/midi_capture_1".to_string(),
            "/graph/gain_1/in".to_string()
        )]
    );

    // the device appears: the connection materializes and is broadcast
    let mut messages = rig_b.session.broadcaster().subscribe();
    router_b.add_midi_port("system:midi_capture_1", "in-hw-1-0-0-Keystation", false);
    rig_b
        .session
        .midi_port_appeared("system:midi_capture_1", false);

    assert_eq!(
        rig_b.session.connections(),
        &[(
            "/graph/midi_capture_1".to_string(),
            "/graph/gain_1/in".to_string()
        )]
    );
    assert!(rig_b.session.midiports()[0].pending_connections.is_empty());
    assert!(router_b
        .connections()
        .contains(&("system:midi_capture_1".to_string(), "effect_0:in".to_string())));

    let mut saw_connect = false;
    while let Ok(msg) = messages.try_recv() {
        if msg == "connect /graph/midi_capture_1 /graph/gain_1/in" {
            saw_connect = true;
        }
    }
    assert!(saw_connect);
}

#[tokio::test]
async fn test_midi_port_deleted_parks_edges() {
    let dir = tempfile::tempdir().unwrap();
    let router = Arc::new(MockRouter::new());
    router.add_midi_port("system:midi_capture_1", "in-hw-1-0-0-Keystation", false);
    let mut rig = rig_with_router(dir.path(), router).await;

    rig.session
        .set_midi_devices(&["system:midi_capture_1".to_string()]);
    rig.session
        .add_plugin("/graph/gain_1", "urn:ex:gain", 0.0, 0.0)
        .await
        .unwrap();
    rig.session
        .connect("/graph/midi_capture_1", "/graph/gain_1/in")
        .await
        .unwrap();

    rig.session.midi_port_deleted("system:midi_capture_1");

    assert!(rig.session.connections().is_empty());
    assert_eq!(rig.session.midiports()[0].pending_connections.len(), 1);
}

#[tokio::test]
async fn test_extra_presets_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path()).await;

    rig.session
        .add_plugin("/graph/gain_1", "urn:ex:gain", 0.0, 0.0)
        .await
        .unwrap();
    let saved = rig.session.save("Snapshots", false).await.unwrap();

    // no extra presets: the sidecar is absent
    assert!(!saved.join("presets.json").exists());

    std::fs::write(
        saved.join("presets.json"),
        r#"[{"name": "Loud", "data": {"/graph/gain_1": {"bypassed": false, "ports": {"gain": 6.0}, "preset": ""}}}]"#,
    )
    .unwrap();

    let mut restored = support::rig(dir.path()).await;
    restored.session.load(&saved, false).await.unwrap();

    let presets = restored.session.pedalboard_presets();
    assert_eq!(presets.len(), 2);
    assert_eq!(presets[0].name, "Default");
    assert_eq!(presets[1].name, "Loud");

    // any topology change invalidates the whole-board presets
    restored
        .session
        .add_plugin("/graph/delay_1", "urn:ex:delay", 0.0, 0.0)
        .await
        .unwrap();
    assert!(restored.session.pedalboard_presets().is_empty());
}

#[tokio::test]
async fn test_hmi_pedalboard_reset_restores_saved_values() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path()).await;

    rig.session
        .add_plugin("/graph/gain_1", "urn:ex:gain", 0.0, 0.0)
        .await
        .unwrap();
    rig.session
        .param_set("/graph/gain_1/gain", -6.0)
        .await
        .unwrap();
    let saved = rig.session.save("Baseline", false).await.unwrap();
    assert!(saved.exists());

    // twist the knob, then reset from the surface
    rig.session
        .param_set("/graph/gain_1/gain", 12.0)
        .await
        .unwrap();
    assert!(rig.session.pedalboard_modified());

    let reply = rig
        .session
        .dispatch_hmi(stagehand::HmiRequest::ResetPedalboard)
        .await;
    assert!(reply.ok);

    let plugin = rig.session.plugin_by_instance("/graph/gain_1").unwrap();
    assert_eq!(plugin.ports.get("gain"), Some(&-6.0));
    assert!(!rig.session.pedalboard_modified());
}

#[tokio::test]
async fn test_hmi_banks_and_pedalboard_listing() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path()).await;

    // nothing saved yet: empty banks reply
    let reply = rig.session.dispatch_hmi(stagehand::HmiRequest::ListBanks).await;
    assert!(reply.ok);
    assert_eq!(reply.payload, "");

    rig.session
        .add_plugin("/graph/gain_1", "urn:ex:gain", 0.0, 0.0)
        .await
        .unwrap();
    rig.session.save("Stage \"A\" Loud", false).await.unwrap();
    rig.session
        .set_all_pedalboards(stagehand::list_pedalboards(&dir.path().join("pedalboards")));

    let reply = rig.session.dispatch_hmi(stagehand::HmiRequest::ListBanks).await;
    assert_eq!(reply.payload, "All 0");

    // titles are upper-cased and quote-stripped on the surface
    let reply = rig
        .session
        .dispatch_hmi(stagehand::HmiRequest::ListBankPedalboards { bank_id: 0 })
        .await;
    assert!(reply.ok);
    assert_eq!(reply.payload, "\"STAGE A LOUD\" 0");

    let reply = rig
        .session
        .dispatch_hmi(stagehand::HmiRequest::ListBankPedalboards { bank_id: 3 })
        .await;
    assert!(!reply.ok);
}
