use serde::{Deserialize, Serialize};

use crate::{error::StoreError, sensors::sanitize_calibration, types::SensorId};

pub const SLOT_COUNT: usize = 10;
pub const UID_LEN: usize = 8;
pub const CREDENTIAL_LEN: usize = 16;

const STATE_REGISTER_ADDR: usize = 0;
const FORCED_REGISTER_ADDR: usize = STATE_REGISTER_ADDR + 2;
const UIDS_ADDR: usize = FORCED_REGISTER_ADDR + 2;
const FACTORS_ADDR: usize = UIDS_ADDR + UID_LEN * SLOT_COUNT;
const THRESHOLDS_ADDR: usize = FACTORS_ADDR + 8 * SLOT_COUNT;
const REMOTE_AP_ADDR: usize = THRESHOLDS_ADDR + 2 * SLOT_COUNT;
const REMOTE_PW_ADDR: usize = REMOTE_AP_ADDR + CREDENTIAL_LEN;
const SERVER_IP_ADDR: usize = REMOTE_PW_ADDR + CREDENTIAL_LEN;
const SERVER_PORT_ADDR: usize = SERVER_IP_ADDR + 4;
const LOCAL_AP_ADDR: usize = SERVER_PORT_ADDR + 2;
const LOCAL_PW_ADDR: usize = LOCAL_AP_ADDR + CREDENTIAL_LEN;

/// Bytes needed to hold the whole layout.
pub const STORE_SIZE: usize = LOCAL_PW_ADDR + CREDENTIAL_LEN;

/// Byte address in the non-volatile image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreKey(pub usize);

/// Byte-level non-volatile storage.
pub trait ConfigStore {
    fn size(&self) -> usize;

    fn read_bytes(&self, key: StoreKey, buf: &mut [u8]) -> Result<(), StoreError>;

    /// Returns the number of bytes that actually changed.
    fn write_bytes(&mut self, key: StoreKey, data: &[u8]) -> Result<usize, StoreError>;

    /// Bytes physically rewritten since the store was opened, if tracked.
    fn write_count(&self) -> usize {
        0
    }

    fn read_int(&self, key: StoreKey) -> Result<i16, StoreError> {
        let mut buf = [0u8; 2];
        self.read_bytes(key, &mut buf)?;
        Ok(i16::from_le_bytes(buf))
    }

    fn write_int(&mut self, key: StoreKey, value: i16) -> Result<usize, StoreError> {
        self.write_bytes(key, &value.to_le_bytes())
    }

    fn read_float(&self, key: StoreKey) -> Result<f64, StoreError> {
        let mut buf = [0u8; 8];
        self.read_bytes(key, &mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    fn write_float(&mut self, key: StoreKey, value: f64) -> Result<usize, StoreError> {
        self.write_bytes(key, &value.to_le_bytes())
    }
}

/// RAM-backed image; the host mirrors it to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStore {
    bytes: Vec<u8>,
    write_count: usize,
    dirty: bool,
}

impl MemoryStore {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
            write_count: 0,
            dirty: false,
        }
    }

    /// Loads a saved image, padding or truncating to `size`.
    pub fn from_image(mut bytes: Vec<u8>, size: usize) -> Self {
        bytes.resize(size, 0);
        Self {
            bytes,
            write_count: 0,
            dirty: false,
        }
    }

    pub fn image(&self) -> &[u8] {
        &self.bytes
    }

    /// True once after any byte changed.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn range(&self, key: StoreKey, len: usize) -> Result<std::ops::Range<usize>, StoreError> {
        let end = key.0 + len;
        if end > self.bytes.len() {
            return Err(StoreError::OutOfRange {
                start: key.0,
                end,
                size: self.bytes.len(),
            });
        }
        Ok(key.0..end)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(STORE_SIZE)
    }
}

impl ConfigStore for MemoryStore {
    fn size(&self) -> usize {
        self.bytes.len()
    }

    fn write_count(&self) -> usize {
        self.write_count
    }

    fn read_bytes(&self, key: StoreKey, buf: &mut [u8]) -> Result<(), StoreError> {
        let range = self.range(key, buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write_bytes(&mut self, key: StoreKey, data: &[u8]) -> Result<usize, StoreError> {
        let range = self.range(key, data.len())?;
        let mut written = 0;
        for (slot, byte) in self.bytes[range].iter_mut().zip(data) {
            if slot != byte {
                *slot = *byte;
                written += 1;
            }
        }
        if written > 0 {
            self.write_count += written;
            self.dirty = true;
        }
        Ok(written)
    }
}

/// Maps an id to `base + index * element_size` by its position in a fixed table.
#[derive(Debug, Clone, Copy)]
pub struct SlotTable {
    pub field: &'static str,
    pub base: usize,
    pub element_size: usize,
    pub ids: &'static [SensorId],
}

impl SlotTable {
    pub fn key_for(&self, id: SensorId) -> Result<StoreKey, StoreError> {
        self.ids
            .iter()
            .take(SLOT_COUNT)
            .position(|candidate| *candidate == id)
            .map(|index| StoreKey(self.base + index * self.element_size))
            .ok_or(StoreError::NoSuchField {
                field: self.field,
                id: id.0,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkField {
    RemoteAp(String),
    RemotePassword(String),
    LocalAp(String),
    LocalPassword(String),
    ServerIp([u8; 4]),
    ServerPort(u16),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkSettings {
    pub remote_ap: String,
    pub remote_password: String,
    pub local_ap: String,
    pub local_password: String,
    pub server_ip: [u8; 4],
    pub server_port: u16,
}

impl NetworkSettings {
    pub fn fields(&self) -> Vec<NetworkField> {
        vec![
            NetworkField::RemoteAp(self.remote_ap.clone()),
            NetworkField::RemotePassword(self.remote_password.clone()),
            NetworkField::LocalAp(self.local_ap.clone()),
            NetworkField::LocalPassword(self.local_password.clone()),
            NetworkField::ServerIp(self.server_ip),
            NetworkField::ServerPort(self.server_port),
        ]
    }
}

/// Typed view over a [`ConfigStore`] using the node image layout.
#[derive(Debug, Clone)]
pub struct NodeStore<S> {
    backend: S,
    uids: SlotTable,
    factors: SlotTable,
    thresholds: SlotTable,
}

impl<S: ConfigStore> NodeStore<S> {
    pub fn new(
        backend: S,
        calibrated: &'static [SensorId],
        thresholds: &'static [SensorId],
    ) -> Self {
        Self {
            backend,
            uids: SlotTable {
                field: "uid",
                base: UIDS_ADDR,
                element_size: UID_LEN,
                ids: calibrated,
            },
            factors: SlotTable {
                field: "calibration",
                base: FACTORS_ADDR,
                element_size: 8,
                ids: calibrated,
            },
            thresholds: SlotTable {
                field: "threshold",
                base: THRESHOLDS_ADDR,
                element_size: 2,
                ids: thresholds,
            },
        }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut S {
        &mut self.backend
    }

    pub fn calibrated_sensors(&self) -> &'static [SensorId] {
        self.factors.ids
    }

    pub fn threshold_sensors(&self) -> &'static [SensorId] {
        self.thresholds.ids
    }

    /// Writes unity calibration factors and the given thresholds.
    pub fn format(&mut self, thresholds: &[(SensorId, i16)]) -> Result<(), StoreError> {
        for id in self.factors.ids {
            self.save_calibration(*id, 1.0)?;
        }
        for (id, value) in thresholds {
            self.save_threshold(*id, *value)?;
        }
        Ok(())
    }

    /// `(state, forced)` bit registers.
    pub fn registers(&self) -> Result<(u16, u16), StoreError> {
        let state = self.backend.read_int(StoreKey(STATE_REGISTER_ADDR))?;
        let forced = self.backend.read_int(StoreKey(FORCED_REGISTER_ADDR))?;
        Ok((state as u16, forced as u16))
    }

    pub fn save_state_register(&mut self, register: u16) -> Result<usize, StoreError> {
        self.backend
            .write_int(StoreKey(STATE_REGISTER_ADDR), register as i16)
    }

    pub fn save_forced_register(&mut self, register: u16) -> Result<usize, StoreError> {
        self.backend
            .write_int(StoreKey(FORCED_REGISTER_ADDR), register as i16)
    }

    pub fn calibration(&self, id: SensorId) -> Result<f64, StoreError> {
        let key = self.factors.key_for(id)?;
        Ok(sanitize_calibration(self.backend.read_float(key)?))
    }

    pub fn save_calibration(&mut self, id: SensorId, factor: f64) -> Result<usize, StoreError> {
        let key = self.factors.key_for(id)?;
        self.backend.write_float(key, factor)
    }

    pub fn sensor_uid(&self, id: SensorId) -> Result<[u8; UID_LEN], StoreError> {
        let key = self.uids.key_for(id)?;
        let mut uid = [0u8; UID_LEN];
        self.backend.read_bytes(key, &mut uid)?;
        Ok(uid)
    }

    pub fn save_sensor_uid(&mut self, id: SensorId, uid: [u8; UID_LEN]) -> Result<usize, StoreError> {
        let key = self.uids.key_for(id)?;
        self.backend.write_bytes(key, &uid)
    }

    pub fn threshold(&self, id: SensorId) -> Result<i16, StoreError> {
        let key = self.thresholds.key_for(id)?;
        self.backend.read_int(key)
    }

    pub fn save_threshold(&mut self, id: SensorId, value: i16) -> Result<usize, StoreError> {
        let key = self.thresholds.key_for(id)?;
        self.backend.write_int(key, value)
    }

    pub fn network(&self) -> Result<NetworkSettings, StoreError> {
        let mut ip = [0u8; 4];
        self.backend.read_bytes(StoreKey(SERVER_IP_ADDR), &mut ip)?;
        Ok(NetworkSettings {
            remote_ap: self.read_credential(REMOTE_AP_ADDR)?,
            remote_password: self.read_credential(REMOTE_PW_ADDR)?,
            local_ap: self.read_credential(LOCAL_AP_ADDR)?,
            local_password: self.read_credential(LOCAL_PW_ADDR)?,
            server_ip: ip,
            server_port: self.backend.read_int(StoreKey(SERVER_PORT_ADDR))? as u16,
        })
    }

    pub fn save_network(&mut self, field: &NetworkField) -> Result<usize, StoreError> {
        match field {
            NetworkField::RemoteAp(value) => self.write_credential(REMOTE_AP_ADDR, value),
            NetworkField::RemotePassword(value) => self.write_credential(REMOTE_PW_ADDR, value),
            NetworkField::LocalAp(value) => self.write_credential(LOCAL_AP_ADDR, value),
            NetworkField::LocalPassword(value) => self.write_credential(LOCAL_PW_ADDR, value),
            NetworkField::ServerIp(ip) => self.backend.write_bytes(StoreKey(SERVER_IP_ADDR), ip),
            NetworkField::ServerPort(port) => self
                .backend
                .write_int(StoreKey(SERVER_PORT_ADDR), *port as i16),
        }
    }

    // Unterminated credentials read as empty.
    fn read_credential(&self, addr: usize) -> Result<String, StoreError> {
        let mut raw = [0u8; CREDENTIAL_LEN];
        self.backend.read_bytes(StoreKey(addr), &mut raw)?;
        let Some(end) = raw.iter().position(|byte| *byte == 0) else {
            return Ok(String::new());
        };
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    fn write_credential(&mut self, addr: usize, value: &str) -> Result<usize, StoreError> {
        let mut raw = [0u8; CREDENTIAL_LEN];
        let len = value.len().min(CREDENTIAL_LEN - 1);
        raw[..len].copy_from_slice(&value.as_bytes()[..len]);
        self.backend.write_bytes(StoreKey(addr), &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CALIBRATED: &[SensorId] = &[SensorId(54), SensorId(55), SensorId(56)];
    const THRESHOLDS: &[SensorId] = &[SensorId(201), SensorId(202)];

    fn store() -> NodeStore<MemoryStore> {
        NodeStore::new(MemoryStore::default(), CALIBRATED, THRESHOLDS)
    }

    #[test]
    fn layout_fits_the_image() {
        assert_eq!(STORE_SIZE, 254);
        assert_eq!(FACTORS_ADDR, 84);
        assert_eq!(THRESHOLDS_ADDR, 164);
    }

    #[test]
    fn calibration_round_trips_exactly() {
        let mut store = store();
        store.save_calibration(SensorId(56), 1.05).unwrap();
        assert_eq!(store.calibration(SensorId(56)).unwrap(), 1.05);
    }

    #[test]
    fn blank_calibration_reads_as_unity() {
        assert_eq!(store().calibration(SensorId(55)).unwrap(), 1.0);
    }

    #[test]
    fn unknown_id_is_a_lookup_miss() {
        let mut store = store();
        assert_eq!(
            store.save_calibration(SensorId(99), 2.0),
            Err(StoreError::NoSuchField {
                field: "calibration",
                id: 99
            })
        );
        assert!(store.threshold(SensorId(56)).is_err());
        assert_eq!(store.backend().write_count(), 0);
    }

    #[test]
    fn slots_do_not_overlap() {
        let mut store = store();
        store.save_calibration(SensorId(54), 1.5).unwrap();
        store.save_calibration(SensorId(55), 0.5).unwrap();
        store.save_threshold(SensorId(201), 10).unwrap();
        store.save_threshold(SensorId(202), 20).unwrap();
        assert_eq!(store.calibration(SensorId(54)).unwrap(), 1.5);
        assert_eq!(store.calibration(SensorId(55)).unwrap(), 0.5);
        assert_eq!(store.threshold(SensorId(201)).unwrap(), 10);
        assert_eq!(store.threshold(SensorId(202)).unwrap(), 20);
    }

    #[test]
    fn unchanged_writes_cost_nothing() {
        let mut store = store();
        assert_eq!(store.save_state_register(0b101).unwrap(), 1);
        assert!(store.backend_mut().take_dirty());
        assert_eq!(store.save_state_register(0b101).unwrap(), 0);
        assert!(!store.backend_mut().take_dirty());
        assert_eq!(store.backend().write_count(), 1);
    }

    #[test]
    fn registers_round_trip_high_bits() {
        let mut store = store();
        store.save_state_register(0x8101).unwrap();
        store.save_forced_register(0x0100).unwrap();
        assert_eq!(store.registers().unwrap(), (0x8101, 0x0100));
    }

    #[test]
    fn credentials_are_truncated_and_terminated() {
        let mut store = store();
        store
            .save_network(&NetworkField::RemoteAp("a-very-long-network-name".into()))
            .unwrap();
        store
            .save_network(&NetworkField::ServerIp([192, 168, 1, 10]))
            .unwrap();
        store.save_network(&NetworkField::ServerPort(8080)).unwrap();

        let network = store.network().unwrap();
        assert_eq!(network.remote_ap, "a-very-long-net");
        assert_eq!(network.server_ip, [192, 168, 1, 10]);
        assert_eq!(network.server_port, 8080);
        assert_eq!(network.local_ap, "");
    }

    #[test]
    fn unterminated_credential_reads_empty() {
        let mut store = store();
        store
            .backend_mut()
            .write_bytes(StoreKey(REMOTE_PW_ADDR), &[b'x'; CREDENTIAL_LEN])
            .unwrap();
        assert_eq!(store.network().unwrap().remote_password, "");
    }

    #[test]
    fn uid_round_trip() {
        let mut store = store();
        let uid = [0x28, 0xff, 0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc];
        store.save_sensor_uid(SensorId(55), uid).unwrap();
        assert_eq!(store.sensor_uid(SensorId(55)).unwrap(), uid);
    }

    #[test]
    fn format_seeds_thresholds() {
        let mut store = store();
        store
            .format(&[(SensorId(201), 10), (SensorId(202), 20)])
            .unwrap();
        assert_eq!(store.threshold(SensorId(202)).unwrap(), 20);
        assert_eq!(store.calibration(SensorId(54)).unwrap(), 1.0);
    }

    #[test]
    fn reads_past_the_end_are_rejected() {
        let store = MemoryStore::new(4);
        let mut buf = [0u8; 8];
        assert!(matches!(
            store.read_bytes(StoreKey(0), &mut buf),
            Err(StoreError::OutOfRange { .. })
        ));
    }
}
