use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use straddle_core::ConfigLoader;
use straddle_engine::Trend;
use straddle_orchestrator::{spawn_instance, Collaborators, InstanceConfig, InstanceState};
use straddle_paper::{CsvTickSource, PaperOrderCoordinator, StaticStrikeLadder};

fn workspace_file(relative: &str) -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(relative)
}

#[tokio::test]
async fn replay_sample_ticks_through_paper_instance() {
    let config = ConfigLoader::load_from(workspace_file("../../config/Config.toml"))
        .expect("Failed to load sample config");
    let ticks = CsvTickSource::from_csv(workspace_file("tests/data/nifty_ticks.csv"))
        .expect("Failed to load sample ticks");
    assert_eq!(ticks.len(), 10);

    let paper = Arc::new(PaperOrderCoordinator::new());
    let ladder = Arc::new(StaticStrikeLadder::from_settings(
        config.instance.symbol.clone(),
        &config.ladder,
    ));
    let handle = spawn_instance(
        InstanceConfig::from_app(&config),
        Collaborators {
            ticks: Arc::new(ticks),
            orders: paper.clone(),
            strikes: ladder,
        },
    )
    .unwrap();

    handle.start().await.unwrap();
    let status = tokio::time::timeout(
        Duration::from_secs(5),
        handle.wait_for_state(InstanceState::Stopped),
    )
    .await
    .expect("replay did not finish")
    .unwrap();

    // Rolled up to 22050 at 22090, then one bearish leg into the 22000 put at 21989
    let snapshot = status.snapshot.expect("snapshot after replay");
    assert_eq!(snapshot.current_atm, dec!(22050));
    assert_eq!(snapshot.leg, 1);
    assert_eq!(snapshot.trend, Trend::Bearish);
    assert_eq!(snapshot.leg_contracts, vec!["NIFTY-22000-PE".to_string()]);
    assert_eq!(
        paper.open_positions(),
        vec![
            ("NIFTY-22000-PE".to_string(), dec!(25)),
            ("NIFTY-22050-CE".to_string(), dec!(75)),
            ("NIFTY-22050-PE".to_string(), dec!(100)),
        ]
    );

    handle.shutdown().await.unwrap();
}
