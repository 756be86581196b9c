// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Scenario integration tests: fault injection observed over the wire.

use std::time::Duration;

use modsim_core::types::ScenarioType;
use modsim_tests::common::{fleet_config, start_fleet, ModbusClient, TEST_TICK};

fn slave_addr(port: u16) -> std::net::SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

async fn read_voltage_raw(client: &mut ModbusClient) -> u16 {
    let pdu = client.request(1, &[0x03, 0x00, 0x00, 0x00, 0x01]).await.unwrap();
    assert_eq!(pdu[0], 0x03);
    u16::from_be_bytes([pdu[2], pdu[3]])
}

#[tokio::test]
async fn voltage_sag_reaches_the_wire_within_a_tick() {
    let supervisor = start_fleet(fleet_config(1, 25702)).await;
    let mut client = ModbusClient::connect(slave_addr(25702)).await.unwrap();

    // Default sag parameters: depth 0.2, so voltage drops to ~80%.
    supervisor.apply_scenario(ScenarioType::VoltageSag);
    tokio::time::sleep(TEST_TICK * 3).await;

    let raw = read_voltage_raw(&mut client).await;
    assert!(raw <= 1800, "voltage raw {raw} did not sag");

    supervisor.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn switching_back_to_normal_restores_the_envelope() {
    let supervisor = start_fleet(fleet_config(1, 25704)).await;
    let mut client = ModbusClient::connect(slave_addr(25704)).await.unwrap();

    supervisor.apply_scenario(ScenarioType::VoltageSag);
    tokio::time::sleep(TEST_TICK * 3).await;

    supervisor.apply_scenario(ScenarioType::Normal);
    tokio::time::sleep(TEST_TICK * 3).await;

    let raw = read_voltage_raw(&mut client).await;
    let volts = f64::from(raw) / 10.0;
    assert!((volts - 220.0).abs() <= 2.2, "voltage {volts} did not recover");

    supervisor.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn energy_is_monotonic_across_ticks() {
    let supervisor = start_fleet(fleet_config(1, 25706)).await;
    let slave = supervisor.slaves().into_iter().next().unwrap();

    let mut previous = 0.0;
    for _ in 0..5 {
        tokio::time::sleep(TEST_TICK * 2).await;
        let energy = slave.registers().get_scaled_value(40004).unwrap();
        assert!(energy >= previous, "energy decreased: {previous} -> {energy}");
        previous = energy;
    }

    supervisor.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn packet_loss_drops_within_a_binomial_band() {
    let mut config = fleet_config(1, 25708);
    // Force a deterministic-ish experiment: p = 0.3 over 120 requests.
    config
        .scenario
        .scenarios
        .get_mut("packet_loss")
        .unwrap()
        .packet_loss_rate = 0.3;
    let supervisor = start_fleet(config).await;
    let mut client = ModbusClient::connect(slave_addr(25708)).await.unwrap();

    supervisor.apply_scenario(ScenarioType::PacketLoss);
    tokio::time::sleep(TEST_TICK * 3).await;

    let total = 120;
    let mut dropped = 0;
    for _ in 0..total {
        let response = client
            .request_timeout(1, &[0x03, 0x00, 0x00, 0x00, 0x01], Duration::from_millis(100))
            .await
            .unwrap();
        if response.is_none() {
            dropped += 1;
        }
    }

    // p = 0.3, n = 120: mean 36, sd ~5. A wide band keeps this stable
    // while still catching a broken loss path in either direction.
    assert!(
        (15..=60).contains(&dropped),
        "dropped {dropped} of {total}, outside the binomial band"
    );

    supervisor.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn jitter_delays_responses() {
    let mut config = fleet_config(1, 25710);
    let jitter = config.scenario.scenarios.get_mut("jitter").unwrap();
    jitter.jitter_min = Duration::from_millis(50);
    jitter.jitter_max = Duration::from_millis(80);
    let supervisor = start_fleet(config).await;
    let mut client = ModbusClient::connect(slave_addr(25710)).await.unwrap();

    supervisor.apply_scenario(ScenarioType::Jitter);
    tokio::time::sleep(TEST_TICK * 3).await;

    let started = std::time::Instant::now();
    client.request(1, &[0x03, 0x00, 0x00, 0x00, 0x01]).await.unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed >= Duration::from_millis(45),
        "response arrived too fast: {elapsed:?}"
    );

    supervisor.stop(Duration::from_secs(5)).await.unwrap();
}
