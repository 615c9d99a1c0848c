use energomera2mqtt::{mqtt::ha_interface::status_topic, ConfigHolder, EnergomeraManager, MqttManager};
use tokio::task::JoinHandle;
use std::env;
use log::{error, info};


#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    let default_filter = std::env::var("E2M_LOG_LEVEL").unwrap_or("info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let holder = match ConfigHolder::load(env::args().nth(1)) {
        Ok(h) => h,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    // we need a channel for the meter side to send metering data to MQTT
    let (mut mqtt, tx) = MqttManager::new(&holder.config.mqtt, status_topic(&holder.config.meter.name));
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    let mut threads: Vec<JoinHandle<()>> = Vec::new();

    threads.push(tokio::spawn(async move {
        mqtt.start_thread().await;
    }));

    let mut meter = EnergomeraManager::new(tx, holder);
    let meter_thread = tokio::spawn(async move {
        meter.start_thread(shutdown_rx).await;
    });

    info!("All modules started, now waiting for a signal to exit");
    tokio::signal::ctrl_c().await?;

    info!("Exiting, closing the meter session");
    let _ = shutdown_tx.send(());
    if let Err(e) = meter_thread.await {
        error!("Meter thread ended badly: {}", e);
    }

    /* the manager dropped its sender, MQTT drains and exits */
    for task in threads {
        let _ = task.await;
    }
    Ok(())
}
