// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Fleet-level integration tests: multiple slaves, aggregate statistics.

use std::time::Duration;

use modsim_core::types::SupervisorState;
use modsim_tests::common::{fleet_config, start_fleet, ModbusClient};

#[tokio::test]
async fn three_slaves_report_active() {
    let supervisor = start_fleet(fleet_config(3, 25602)).await;

    let stats = supervisor.stats();
    assert_eq!(stats.slave_count, 3);
    assert_eq!(stats.active_slaves, 3);
    assert_eq!(stats.state, SupervisorState::Running);

    supervisor.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn each_slave_answers_on_its_own_address() {
    let supervisor = start_fleet(fleet_config(3, 25604)).await;

    for host in 1..=3 {
        let addr = format!("127.0.0.{host}:25604").parse().unwrap();
        let mut client = ModbusClient::connect(addr).await.unwrap();
        // Unit 0 is the wildcard, so one client works against every slave.
        let pdu = client.request(0, &[0x03, 0x00, 0x00, 0x00, 0x01]).await.unwrap();
        assert_eq!(pdu[0], 0x03);
    }

    supervisor.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn aggregate_counters_accumulate_across_slaves() {
    let supervisor = start_fleet(fleet_config(2, 25606)).await;

    for host in 1..=2 {
        let addr = format!("127.0.0.{host}:25606").parse().unwrap();
        let mut client = ModbusClient::connect(addr).await.unwrap();
        for _ in 0..5 {
            client.request(0, &[0x03, 0x00, 0x00, 0x00, 0x01]).await.unwrap();
        }
    }

    let stats = supervisor.stats();
    assert_eq!(stats.total_requests, 10);
    assert_eq!(stats.total_errors, 0);
    // Each exchange moved 12 bytes in and 11 bytes out.
    assert_eq!(stats.bytes_in, 120);
    assert_eq!(stats.bytes_out, 110);

    supervisor.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn stop_honors_deadline_and_clears_fleet() {
    let supervisor = start_fleet(fleet_config(2, 25608)).await;

    supervisor.stop(Duration::from_secs(5)).await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert_eq!(supervisor.stats().slave_count, 0);

    // Once stopped, the addresses no longer accept connections.
    let addr: std::net::SocketAddr = "127.0.0.1:25608".parse().unwrap();
    let connect = tokio::time::timeout(
        Duration::from_millis(500),
        tokio::net::TcpStream::connect(addr),
    )
    .await;
    match connect {
        Ok(Ok(_)) => panic!("listener still accepting after stop"),
        Ok(Err(_)) | Err(_) => {}
    }
}
