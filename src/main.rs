use anyhow::Result;
use fridge_controller::{config, controller, hardware, telemetry};
use config::Config;
use controller::{Compressor, Monitor, Thermostat};
use hardware::DeviceFactory;
use std::sync::Arc;
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;
    init_tracing(cfg.logging.format);

    info!(
        name = %cfg.controller.name,
        mode = ?cfg.hardware.mode,
        "starting fridge controller"
    );

    let devices = DeviceFactory::new(cfg.hardware.mode).create_devices(&cfg.simulation.fridge());

    let compressor = Arc::new(Compressor::new(
        cfg.controller.name.clone(),
        devices.switch.clone(),
        cfg.controller.recovery(),
    ));

    let monitor = Arc::new(Monitor::spawn(
        devices.thermometer.clone(),
        cfg.monitor.sample_period(),
    ));
    match monitor
        .wait_for_first_sample(cfg.monitor.startup_wait_attempts, cfg.monitor.startup_wait())
        .await
    {
        Ok(sample) => info!(%sample, "thermometer ready"),
        Err(e) => warn!(error = %e, "no temperature yet, controller will wait for the monitor"),
    }

    let thermostat = if cfg.controller.assume_recovery_on_start {
        Thermostat::new_assuming_recovery(
            monitor.clone(),
            compressor.clone(),
            cfg.controller.thermostat(),
        )
    } else {
        Thermostat::new(monitor.clone(), compressor.clone(), cfg.controller.thermostat())
    };
    let setpoint = cfg.setpoint.setpoint()?;
    info!(%setpoint, "applying setpoint");
    thermostat.set_setpoint(setpoint)?;

    let shutdown = telemetry::shutdown_signal();
    tokio::pin!(shutdown);
    let mut report = tokio::time::interval(cfg.monitor.status_interval());

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = report.tick() => {
                info!(
                    monitor = %monitor,
                    compressor = %compressor,
                    thermostat = %thermostat,
                    "status"
                );
            }
        }
    }

    thermostat.close().await;
    monitor.shutdown();
    info!(compressor = %compressor, "shutdown complete");
    Ok(())
}
