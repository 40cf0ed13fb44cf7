use std::{f64::consts::TAU, time::Duration};

use anyhow::Context;
use chrono::{Local, NaiveTime, Timelike};
use rumqttc::{AsyncClient, LastWill, MqttOptions, QoS};
use tracing::{info, warn};

use homekeeper_common::{
    message::SensorStatus, types::sensor, Message, STATUS_OFFLINE, STATUS_ONLINE, TOPIC_COMMANDS,
    TOPIC_SENSOR_STATUS,
};

const PUBLISH_INTERVAL: Duration = Duration::from_secs(30);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);

    let mut mqtt_options = MqttOptions::new("homekeeper-room-sensor", mqtt_host, mqtt_port);
    mqtt_options.set_last_will(LastWill::new(
        TOPIC_SENSOR_STATUS,
        STATUS_OFFLINE,
        QoS::AtLeastOnce,
        true,
    ));

    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    mqtt.publish(TOPIC_SENSOR_STATUS, QoS::AtLeastOnce, true, STATUS_ONLINE)
        .await
        .context("failed to publish sensor online status")?;

    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                warn!("sensor mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    info!("room sensor publisher started");

    let mut interval = tokio::time::interval(PUBLISH_INTERVAL);
    loop {
        interval.tick().await;

        let (temperature, humidity) = room_reading(Local::now().time());
        for (id, value) in [(sensor::ROOM_TEMP, temperature), (sensor::ROOM_HUMIDITY, humidity)] {
            let payload = Message::SensorStatus(SensorStatus {
                id,
                value: Some(value),
                ts: None,
            })
            .to_json()
            .context("failed to encode room reading")?;

            mqtt.publish(TOPIC_COMMANDS, QoS::AtLeastOnce, false, payload)
                .await
                .with_context(|| format!("failed to publish {id}"))?;
        }
    }
}

/// Simulated room climate: warmest mid-afternoon, most humid before dawn.
fn room_reading(at: NaiveTime) -> (i16, i16) {
    let hours = f64::from(at.num_seconds_from_midnight()) / 3_600.0;
    let swing = (TAU * (hours - 15.0) / 24.0).cos();
    let temperature = 20.0 + 2.5 * swing;
    let humidity = 50.0 - 8.0 * swing;
    (temperature.round() as i16, humidity.round() as i16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn at(hour: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, 0, 0).unwrap()
    }

    #[test]
    fn afternoon_is_warmest() {
        assert_eq!(room_reading(at(15)), (23, 42));
        assert_eq!(room_reading(at(3)), (18, 58));
    }

    #[test]
    fn readings_stay_in_a_livable_range() {
        for hour in 0..24 {
            let (temperature, humidity) = room_reading(at(hour));
            assert!((17..=23).contains(&temperature), "{hour}h: {temperature}");
            assert!((40..=60).contains(&humidity), "{hour}h: {humidity}");
        }
    }
}
