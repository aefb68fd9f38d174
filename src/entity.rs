use crate::coordinator::Snapshot;
use crate::home_assistant::{StateAttributes, StatePayload};
use serde_derive::Serialize;
use tokio::sync::watch;

pub const INTEGRATION: &str = "scd4x_bridge";

/// Measurement channels published by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Co2,
    Temperature,
    Humidity,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Co2, Channel::Temperature, Channel::Humidity];

    pub fn key(self) -> &'static str {
        match self {
            Channel::Co2 => "co2",
            Channel::Temperature => "temperature",
            Channel::Humidity => "humidity",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Channel::Co2 => "ppm",
            Channel::Temperature => "°C",
            Channel::Humidity => "%",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Channel::Co2 => "mdi:molecule-co2",
            Channel::Temperature => "mdi:thermometer",
            Channel::Humidity => "mdi:water-percent",
        }
    }

    pub fn device_class(self) -> &'static str {
        match self {
            Channel::Co2 => "carbon_dioxide",
            Channel::Temperature => "temperature",
            Channel::Humidity => "humidity",
        }
    }

    /// Decimal places of the published value
    pub fn precision(self) -> u32 {
        match self {
            Channel::Co2 => 0,
            Channel::Temperature | Channel::Humidity => 1,
        }
    }
}

/// Read-only view of one channel of the coordinator's latest snapshot
#[derive(Debug, Clone)]
pub struct SensorEntity {
    channel: Channel,
    device_name: String,
    serial: u64,
    snapshots: watch::Receiver<Option<Snapshot>>,
}

impl SensorEntity {
    pub fn new(
        channel: Channel,
        device_name: impl Into<String>,
        serial: u64,
        snapshots: watch::Receiver<Option<Snapshot>>,
    ) -> Self {
        Self {
            channel,
            device_name: device_name.into(),
            serial,
            snapshots,
        }
    }

    /// One entity per channel, all sharing the same snapshot feed
    pub fn for_all_channels(
        device_name: &str,
        serial: u64,
        snapshots: &watch::Receiver<Option<Snapshot>>,
    ) -> Vec<SensorEntity> {
        Channel::ALL
            .into_iter()
            .map(|channel| SensorEntity::new(channel, device_name, serial, snapshots.clone()))
            .collect()
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn name(&self) -> String {
        format!("{} {}", self.device_name, self.channel.key())
    }

    pub fn unique_id(&self) -> String {
        format!("{}_{}", self.serial, self.channel.key())
    }

    pub fn entity_id(&self) -> String {
        format!("sensor.{}_{}", slugify(&self.device_name), self.channel.key())
    }

    /// Latest published value, `None` until the first successful cycle
    pub fn native_value(&self) -> Option<f64> {
        self.snapshots
            .borrow()
            .as_ref()
            .map(|snapshot| snapshot.value(self.channel))
    }

    pub fn is_available(&self) -> bool {
        self.native_value().is_some()
    }

    pub fn state_payload(&self) -> StatePayload {
        let state = match self.native_value() {
            Some(value) => format_value(value, self.channel.precision()),
            None => "unavailable".to_string(),
        };
        StatePayload {
            state,
            attributes: StateAttributes {
                friendly_name: self.name(),
                unit_of_measurement: self.channel.unit().to_string(),
                device_class: self.channel.device_class().to_string(),
                icon: self.channel.icon().to_string(),
                state_class: "measurement".to_string(),
                unique_id: self.unique_id(),
                integration: INTEGRATION.to_string(),
                serial: format!("{:012x}", self.serial),
            },
        }
    }
}

fn format_value(value: f64, precision: u32) -> String {
    format!("{:.*}", precision as usize, value)
}

/// Lowercase ASCII slug with runs of other characters collapsed to `_`
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        Snapshot {
            co2: 612.0,
            temperature: 22.4,
            humidity: 41.0,
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Living Room"), "living_room");
        assert_eq!(slugify("  Office / SCD41 "), "office_scd41");
        assert_eq!(slugify("scd4x"), "scd4x");
    }

    #[test]
    fn test_entity_identity() {
        let (_tx, rx) = watch::channel(None);
        let entity = SensorEntity::new(Channel::Temperature, "Living Room", 0xf896_9f07_3bb3, rx);
        assert_eq!(entity.name(), "Living Room temperature");
        assert_eq!(entity.unique_id(), format!("{}_temperature", 0xf896_9f07_3bb3u64));
        assert_eq!(entity.entity_id(), "sensor.living_room_temperature");
    }

    #[test]
    fn test_unavailable_until_first_snapshot() {
        let (tx, rx) = watch::channel(None);
        let entity = SensorEntity::new(Channel::Co2, "scd4x", 1, rx);
        assert!(!entity.is_available());
        assert_eq!(entity.state_payload().state, "unavailable");

        tx.send_replace(Some(snapshot()));
        assert_eq!(entity.native_value(), Some(612.0));
        assert_eq!(entity.state_payload().state, "612");
    }

    #[test]
    fn test_payload_describes_channel() {
        let (_tx, rx) = watch::channel(Some(snapshot()));
        let entities = SensorEntity::for_all_channels("scd4x", 0x1234, &rx);
        assert_eq!(entities.len(), 3);

        let humidity = &entities[2];
        let payload = humidity.state_payload();
        assert_eq!(payload.state, "41.0");
        assert_eq!(payload.attributes.unit_of_measurement, "%");
        assert_eq!(payload.attributes.device_class, "humidity");
        assert_eq!(payload.attributes.icon, "mdi:water-percent");
        assert_eq!(payload.attributes.serial, "000000001234");
    }
}
