//! Persisted device configuration.
//!
//! The record is written as a fixed-size image in a fixed field order, with
//! every string NUL-padded to its storage size and a digest field last. The
//! digest is the first 128 bits of a SHA-256 over the text form of every
//! other field, in record order, joined by `0x1F`. Booleans hash as
//! `true`/`false` and integers as signed decimal. Text fields never hold
//! ASCII control characters, so the separator cannot appear inside a field.
//!
//! An image whose digest does not match its content is never trusted: the
//! medium is wiped and factory defaults are written back.

use std::{fmt, sync::OnceLock};

use log::{info, warn};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::schedule::ClockTime;

pub const SSID_LEN: usize = 33;
pub const PWD_LEN: usize = 64;
pub const CREDENTIAL_LEN: usize = 51;
pub const LABEL_LEN: usize = 51;
pub const DIGEST_LEN: usize = 33;

pub const MIN_TZ_OFFSET: i32 = -12;
pub const MAX_TZ_OFFSET: i32 = 14;

pub const RECORD_LEN: usize = SSID_LEN
    + PWD_LEN
    + 3 * CREDENTIAL_LEN
    + 2 * LABEL_LEN
    + 1 // timer_on
    + 4 // on_time
    + 4 // off_time
    + 1 // lights_on
    + 4 // tz_offset
    + 1 // dst
    + DIGEST_LEN;

const DIGEST_HEX_CHARS: usize = DIGEST_LEN - 1;
const FIELD_SEPARATOR: char = '\u{1f}';

const DEFAULT_AP_PASSWORD: &str = match option_env!("LUMEN_DEFAULT_AP_PWD") {
    Some(password) => password,
    None => "P@ssw0rd123",
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage medium error: {0}")]
    Medium(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("record is {actual} bytes, expected {expected}")]
    RecordLength { expected: usize, actual: usize },
    #[error("field `{0}` holds an invalid value")]
    InvalidField(&'static str),
    #[error("digest mismatch (stored `{stored}`, computed `{computed}`)")]
    DigestMismatch { stored: String, computed: String },
}

impl StoreError {
    pub fn medium(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Medium(err.into())
    }
}

/// NUL-terminated string in a fixed `N`-byte slot; holds at most `N - 1`
/// bytes of UTF-8 with no ASCII control characters.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FixedStr<const N: usize>([u8; N]);

impl<const N: usize> FixedStr<N> {
    pub const CAPACITY: usize = N - 1;
    pub const EMPTY: Self = Self([0; N]);

    /// Builds a slot at compile time. Panics (failing the build in const
    /// context) if `value` does not fit.
    pub const fn from_static(value: &str) -> Self {
        let bytes = value.as_bytes();
        assert!(bytes.len() < N, "value exceeds field capacity");
        let mut buf = [0_u8; N];
        let mut i = 0;
        while i < bytes.len() {
            buf[i] = bytes[i];
            i += 1;
        }
        Self(buf)
    }

    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|byte| *byte == 0).unwrap_or(N);
        std::str::from_utf8(&self.0[..len]).unwrap_or_default()
    }

    /// Replaces the content, or returns false and leaves it untouched if
    /// `value` does not fit or contains a control character.
    pub fn set(&mut self, value: &str) -> bool {
        if value.len() > Self::CAPACITY || value.bytes().any(|byte| byte.is_ascii_control()) {
            return false;
        }
        self.0 = [0; N];
        self.0[..value.len()].copy_from_slice(value.as_bytes());
        true
    }

    fn from_slot(slot: &[u8; N], field: &'static str) -> Result<Self, StoreError> {
        let len = slot
            .iter()
            .position(|byte| *byte == 0)
            .ok_or(StoreError::InvalidField(field))?;
        let (content, padding) = slot.split_at(len);
        if padding.iter().any(|byte| *byte != 0)
            || content.iter().any(u8::is_ascii_control)
            || std::str::from_utf8(content).is_err()
        {
            return Err(StoreError::InvalidField(field));
        }
        Ok(Self(*slot))
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedConfig {
    ssid: FixedStr<SSID_LEN>,
    pwd: FixedStr<PWD_LEN>,
    admin_user: FixedStr<CREDENTIAL_LEN>,
    admin_pwd: FixedStr<CREDENTIAL_LEN>,
    ap_pwd: FixedStr<CREDENTIAL_LEN>,
    title: FixedStr<LABEL_LEN>,
    heading: FixedStr<LABEL_LEN>,
    timer_on: bool,
    on_time: ClockTime,
    off_time: ClockTime,
    lights_on: bool,
    tz_offset: i32,
    dst: bool,
    digest: FixedStr<DIGEST_LEN>,
}

const FACTORY_FIELDS: PersistedConfig = PersistedConfig {
    ssid: FixedStr::from_static("SET_ME"),
    pwd: FixedStr::from_static("SET_ME"),
    admin_user: FixedStr::from_static("admin"),
    admin_pwd: FixedStr::from_static("admin"),
    ap_pwd: FixedStr::from_static(DEFAULT_AP_PASSWORD),
    title: FixedStr::from_static("Lumen"),
    heading: FixedStr::from_static("Lumen Light Controller"),
    timer_on: false,
    on_time: ClockTime::fixed(1700),
    off_time: ClockTime::fixed(2200),
    lights_on: false,
    tz_offset: 0,
    dst: false,
    digest: FixedStr::EMPTY,
};

/// Factory configuration, with its digest already filled in.
pub fn factory_defaults() -> &'static PersistedConfig {
    static FACTORY: OnceLock<PersistedConfig> = OnceLock::new();
    FACTORY.get_or_init(|| {
        let mut config = FACTORY_FIELDS;
        config.seal();
        config
    })
}

impl PersistedConfig {
    pub fn digest(&self) -> &str {
        self.digest.as_str()
    }

    pub fn compute_digest(&self) -> FixedStr<DIGEST_LEN> {
        let fields = [
            self.ssid.as_str().to_string(),
            self.pwd.as_str().to_string(),
            self.admin_user.as_str().to_string(),
            self.admin_pwd.as_str().to_string(),
            self.ap_pwd.as_str().to_string(),
            self.title.as_str().to_string(),
            self.heading.as_str().to_string(),
            self.timer_on.to_string(),
            self.on_time.encoded().to_string(),
            self.off_time.encoded().to_string(),
            self.lights_on.to_string(),
            self.tz_offset.to_string(),
            self.dst.to_string(),
        ];
        let content = fields.join(&FIELD_SEPARATOR.to_string());

        let hash = Sha256::digest(content.as_bytes());
        let mut digest_hex = String::with_capacity(DIGEST_HEX_CHARS);
        for byte in &hash[..DIGEST_HEX_CHARS / 2] {
            use core::fmt::Write as _;
            let _ = write!(&mut digest_hex, "{byte:02x}");
        }

        let mut digest = FixedStr::EMPTY;
        digest.set(&digest_hex);
        digest
    }

    pub fn is_sealed(&self) -> bool {
        self.digest == self.compute_digest()
    }

    fn seal(&mut self) {
        self.digest = self.compute_digest();
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut image = Vec::with_capacity(RECORD_LEN);
        image.extend_from_slice(&self.ssid.0);
        image.extend_from_slice(&self.pwd.0);
        image.extend_from_slice(&self.admin_user.0);
        image.extend_from_slice(&self.admin_pwd.0);
        image.extend_from_slice(&self.ap_pwd.0);
        image.extend_from_slice(&self.title.0);
        image.extend_from_slice(&self.heading.0);
        image.push(u8::from(self.timer_on));
        image.extend_from_slice(&i32::from(self.on_time.encoded()).to_le_bytes());
        image.extend_from_slice(&i32::from(self.off_time.encoded()).to_le_bytes());
        image.push(u8::from(self.lights_on));
        image.extend_from_slice(&self.tz_offset.to_le_bytes());
        image.push(u8::from(self.dst));
        image.extend_from_slice(&self.digest.0);
        image
    }

    /// Decodes an image without checking its digest.
    pub fn decode(image: &[u8]) -> Result<Self, StoreError> {
        if image.len() != RECORD_LEN {
            return Err(StoreError::RecordLength {
                expected: RECORD_LEN,
                actual: image.len(),
            });
        }

        let mut reader = RecordReader(image);
        Ok(Self {
            ssid: FixedStr::from_slot(reader.take()?, "ssid")?,
            pwd: FixedStr::from_slot(reader.take()?, "pwd")?,
            admin_user: FixedStr::from_slot(reader.take()?, "admin_user")?,
            admin_pwd: FixedStr::from_slot(reader.take()?, "admin_pwd")?,
            ap_pwd: FixedStr::from_slot(reader.take()?, "ap_pwd")?,
            title: FixedStr::from_slot(reader.take()?, "title")?,
            heading: FixedStr::from_slot(reader.take()?, "heading")?,
            timer_on: reader.flag("timer_on")?,
            on_time: reader.clock_time("on_time")?,
            off_time: reader.clock_time("off_time")?,
            lights_on: reader.flag("lights_on")?,
            tz_offset: reader.tz_offset()?,
            dst: reader.flag("dst")?,
            digest: FixedStr::from_slot(reader.take()?, "digest")?,
        })
    }
}

struct RecordReader<'a>(&'a [u8]);

impl<'a> RecordReader<'a> {
    fn take<const N: usize>(&mut self) -> Result<&'a [u8; N], StoreError> {
        let (head, rest) = self
            .0
            .split_first_chunk::<N>()
            .ok_or(StoreError::RecordLength {
                expected: RECORD_LEN,
                actual: 0,
            })?;
        self.0 = rest;
        Ok(head)
    }

    fn flag(&mut self, field: &'static str) -> Result<bool, StoreError> {
        match self.take::<1>()? {
            [0] => Ok(false),
            [1] => Ok(true),
            _ => Err(StoreError::InvalidField(field)),
        }
    }

    fn int(&mut self) -> Result<i32, StoreError> {
        Ok(i32::from_le_bytes(*self.take::<4>()?))
    }

    fn clock_time(&mut self, field: &'static str) -> Result<ClockTime, StoreError> {
        u16::try_from(self.int()?)
            .ok()
            .and_then(ClockTime::from_encoded)
            .ok_or(StoreError::InvalidField(field))
    }

    fn tz_offset(&mut self) -> Result<i32, StoreError> {
        let offset = self.int()?;
        if (MIN_TZ_OFFSET..=MAX_TZ_OFFSET).contains(&offset) {
            Ok(offset)
        } else {
            Err(StoreError::InvalidField("tz_offset"))
        }
    }
}

/// Non-volatile storage holding a single configuration image.
pub trait NvMedium {
    /// Returns `None` when nothing has been stored yet.
    fn read(&mut self) -> Result<Option<Vec<u8>>, StoreError>;
    /// Replaces the stored image; only returns once the write committed.
    fn write(&mut self, image: &[u8]) -> Result<(), StoreError>;
    fn wipe(&mut self) -> Result<(), StoreError>;
}

/// RAM-backed medium for tests and diskless runs. Counts writes and can be
/// told to reject them.
#[derive(Debug, Default, Clone)]
pub struct MemoryMedium {
    image: Option<Vec<u8>>,
    writes: usize,
    wipes: usize,
    fail_writes: bool,
}

impl MemoryMedium {
    pub fn with_image(image: Vec<u8>) -> Self {
        Self {
            image: Some(image),
            ..Self::default()
        }
    }

    pub fn image(&self) -> Option<&[u8]> {
        self.image.as_deref()
    }

    pub fn image_mut(&mut self) -> Option<&mut Vec<u8>> {
        self.image.as_mut()
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn wipes(&self) -> usize {
        self.wipes
    }

    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }
}

impl NvMedium for MemoryMedium {
    fn read(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.image.clone())
    }

    fn write(&mut self, image: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::medium(std::io::Error::other(
                "write rejected by medium",
            )));
        }
        self.image = Some(image.to_vec());
        self.writes += 1;
        Ok(())
    }

    fn wipe(&mut self) -> Result<(), StoreError> {
        self.image = None;
        self.wipes += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// Nothing stored yet; the caller should run a factory reset.
    Empty,
    /// The image failed its integrity check and was replaced with factory
    /// defaults. `reset_saved` tells whether writing them back succeeded.
    Corrupt { reset_saved: bool },
    /// The medium could not be read; in-memory values are unchanged.
    ReadFailed,
}

/// Sole owner of the device configuration and the medium it lives on.
#[derive(Debug)]
pub struct ConfigStore<M> {
    medium: M,
    config: PersistedConfig,
}

impl<M: NvMedium> ConfigStore<M> {
    /// Starts from factory defaults; call [`ConfigStore::load`] to pick up
    /// the stored image.
    pub fn new(medium: M) -> Self {
        Self {
            medium,
            config: *factory_defaults(),
        }
    }

    pub fn medium(&self) -> &M {
        &self.medium
    }

    pub fn medium_mut(&mut self) -> &mut M {
        &mut self.medium
    }

    pub fn config(&self) -> &PersistedConfig {
        &self.config
    }

    pub(crate) fn restore(&mut self, config: PersistedConfig) {
        self.config = config;
    }

    pub fn load(&mut self) -> bool {
        self.load_outcome() == LoadOutcome::Loaded
    }

    pub fn load_outcome(&mut self) -> LoadOutcome {
        let image = match self.medium.read() {
            Ok(Some(image)) => image,
            Ok(None) => {
                info!("no stored settings found");
                return LoadOutcome::Empty;
            }
            Err(err) => {
                warn!("failed to read stored settings: {err}");
                return LoadOutcome::ReadFailed;
            }
        };

        match Self::verify(&image) {
            Ok(config) => {
                self.config = config;
                info!("settings loaded ({} bytes)", image.len());
                LoadOutcome::Loaded
            }
            Err(err) => {
                warn!("stored settings invalid ({err}); wiping and restoring factory defaults");
                if let Err(err) = self.medium.wipe() {
                    warn!("failed to wipe settings medium: {err}");
                }
                LoadOutcome::Corrupt {
                    reset_saved: self.factory_reset(),
                }
            }
        }
    }

    /// Boot-time load. Same as [`ConfigStore::load_outcome`], but an empty
    /// medium also gets factory defaults written to it.
    pub fn load_or_init(&mut self) -> LoadOutcome {
        let outcome = self.load_outcome();
        if outcome == LoadOutcome::Empty {
            if self.factory_reset() {
                info!("factory defaults written to empty medium");
            } else {
                warn!("failed to write factory defaults to empty medium");
            }
        }
        outcome
    }

    fn verify(image: &[u8]) -> Result<PersistedConfig, StoreError> {
        let config = PersistedConfig::decode(image)?;
        let computed = config.compute_digest();
        if config.digest != computed {
            return Err(StoreError::DigestMismatch {
                stored: config.digest().to_string(),
                computed: computed.as_str().to_string(),
            });
        }
        Ok(config)
    }

    pub fn save(&mut self) -> bool {
        self.config.seal();
        match self.medium.write(&self.config.encode()) {
            Ok(()) => true,
            Err(err) => {
                warn!("failed to persist settings: {err}");
                false
            }
        }
    }

    pub fn factory_reset(&mut self) -> bool {
        self.config = *factory_defaults();
        self.save()
    }

    pub fn is_factory_default(&self) -> bool {
        self.config.compute_digest() == factory_defaults().compute_digest()
    }

    pub fn default_ssid(&self) -> &'static str {
        factory_defaults().ssid.as_str()
    }

    pub fn default_pwd(&self) -> &'static str {
        factory_defaults().pwd.as_str()
    }

    /// True once both station credentials differ from the factory
    /// placeholders.
    pub fn has_station_credentials(&self) -> bool {
        self.ssid() != self.default_ssid() && self.pwd() != self.default_pwd()
    }

    pub fn ssid(&self) -> &str {
        self.config.ssid.as_str()
    }

    pub fn set_ssid(&mut self, ssid: &str) -> bool {
        self.config.ssid.set(ssid)
    }

    pub fn pwd(&self) -> &str {
        self.config.pwd.as_str()
    }

    pub fn set_pwd(&mut self, pwd: &str) -> bool {
        self.config.pwd.set(pwd)
    }

    pub fn admin_user(&self) -> &str {
        self.config.admin_user.as_str()
    }

    pub fn set_admin_user(&mut self, user: &str) -> bool {
        self.config.admin_user.set(user)
    }

    pub fn admin_pwd(&self) -> &str {
        self.config.admin_pwd.as_str()
    }

    pub fn set_admin_pwd(&mut self, pwd: &str) -> bool {
        self.config.admin_pwd.set(pwd)
    }

    pub fn ap_pwd(&self) -> &str {
        self.config.ap_pwd.as_str()
    }

    pub fn set_ap_pwd(&mut self, pwd: &str) -> bool {
        self.config.ap_pwd.set(pwd)
    }

    pub fn title(&self) -> &str {
        self.config.title.as_str()
    }

    pub fn set_title(&mut self, title: &str) -> bool {
        self.config.title.set(title)
    }

    pub fn heading(&self) -> &str {
        self.config.heading.as_str()
    }

    pub fn set_heading(&mut self, heading: &str) -> bool {
        self.config.heading.set(heading)
    }

    pub fn is_timer_on(&self) -> bool {
        self.config.timer_on
    }

    pub fn set_timer_on(&mut self, on: bool) {
        self.config.timer_on = on;
    }

    pub fn on_time(&self) -> ClockTime {
        self.config.on_time
    }

    pub fn set_on_time(&mut self, time: ClockTime) {
        self.config.on_time = time;
    }

    pub fn off_time(&self) -> ClockTime {
        self.config.off_time
    }

    pub fn set_off_time(&mut self, time: ClockTime) {
        self.config.off_time = time;
    }

    pub fn is_lights_on(&self) -> bool {
        self.config.lights_on
    }

    pub fn set_lights_on(&mut self, on: bool) {
        self.config.lights_on = on;
    }

    pub fn tz_offset(&self) -> i32 {
        self.config.tz_offset
    }

    pub fn set_tz_offset(&mut self, hours: i32) -> bool {
        if !(MIN_TZ_OFFSET..=MAX_TZ_OFFSET).contains(&hours) {
            return false;
        }
        self.config.tz_offset = hours;
        true
    }

    pub fn is_dst(&self) -> bool {
        self.config.dst
    }

    pub fn set_dst(&mut self, dst: bool) {
        self.config.dst = dst;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const DIGEST_OFFSET: usize = RECORD_LEN - DIGEST_LEN;

    fn t(encoded: u16) -> ClockTime {
        ClockTime::from_encoded(encoded).unwrap()
    }

    fn customized_store() -> ConfigStore<MemoryMedium> {
        let mut store = ConfigStore::new(MemoryMedium::default());
        assert!(store.set_ssid("HomeNetwork-5G"));
        assert!(store.set_pwd("correct horse battery staple"));
        assert!(store.set_admin_user("operator"));
        assert!(store.set_admin_pwd("s3cret!"));
        assert!(store.set_ap_pwd("lumen-setup"));
        assert!(store.set_title("Porch"));
        assert!(store.set_heading("Porch Lights"));
        store.set_timer_on(true);
        store.set_on_time(t(1845));
        store.set_off_time(t(615));
        store.set_lights_on(true);
        assert!(store.set_tz_offset(-7));
        store.set_dst(true);
        store
    }

    #[test]
    fn record_image_has_fixed_length() {
        assert_eq!(RECORD_LEN, 400);
        assert_eq!(factory_defaults().encode().len(), RECORD_LEN);
    }

    #[test]
    fn factory_defaults_carry_valid_digest() {
        let factory = factory_defaults();
        assert!(factory.is_sealed());
        assert_eq!(factory.digest().len(), 32);
        assert!(factory
            .digest()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn save_then_load_restores_every_field() {
        let mut store = customized_store();
        assert!(store.save());
        let saved = *store.config();

        let image = store.medium().image().unwrap().to_vec();
        let mut reloaded = ConfigStore::new(MemoryMedium::with_image(image));
        assert!(reloaded.load());

        assert_eq!(*reloaded.config(), saved);
        assert_eq!(reloaded.ssid(), "HomeNetwork-5G");
        assert_eq!(reloaded.pwd(), "correct horse battery staple");
        assert_eq!(reloaded.admin_user(), "operator");
        assert_eq!(reloaded.admin_pwd(), "s3cret!");
        assert_eq!(reloaded.ap_pwd(), "lumen-setup");
        assert_eq!(reloaded.title(), "Porch");
        assert_eq!(reloaded.heading(), "Porch Lights");
        assert!(reloaded.is_timer_on());
        assert_eq!(reloaded.on_time(), t(1845));
        assert_eq!(reloaded.off_time(), t(615));
        assert!(reloaded.is_lights_on());
        assert_eq!(reloaded.tz_offset(), -7);
        assert!(reloaded.is_dst());
    }

    #[test]
    fn saving_same_values_twice_is_bit_identical() {
        let mut store = customized_store();
        assert!(store.save());
        let first = store.medium().image().unwrap().to_vec();

        assert!(store.set_ssid("Elsewhere"));
        assert!(store.set_ssid("HomeNetwork-5G"));
        assert!(store.save());

        assert_eq!(store.medium().image().unwrap(), first.as_slice());
    }

    #[test]
    fn any_flipped_digest_character_resets_to_factory() {
        let mut store = customized_store();
        assert!(store.save());
        let good = store.medium().image().unwrap().to_vec();

        for index in DIGEST_OFFSET..DIGEST_OFFSET + 32 {
            let mut image = good.clone();
            image[index] = if image[index] == b'0' { b'1' } else { b'0' };

            let mut victim = ConfigStore::new(MemoryMedium::with_image(image));
            assert_eq!(
                victim.load_outcome(),
                LoadOutcome::Corrupt { reset_saved: true }
            );
            assert!(victim.is_factory_default());
            assert_eq!(victim.config(), factory_defaults());
            assert_eq!(victim.medium().wipes(), 1);
            assert_eq!(
                victim.medium().image().unwrap(),
                factory_defaults().encode().as_slice()
            );
        }
    }

    #[test]
    fn tampered_field_fails_integrity_check() {
        let mut store = customized_store();
        assert!(store.save());
        let image = store.medium_mut().image_mut().unwrap();
        image[0] = b'h';

        assert!(!store.load());
        assert!(store.is_factory_default());
    }

    #[test]
    fn malformed_images_count_as_corrupt() {
        let mut short = ConfigStore::new(MemoryMedium::with_image(vec![0; RECORD_LEN - 1]));
        assert_eq!(
            short.load_outcome(),
            LoadOutcome::Corrupt { reset_saved: true }
        );

        let mut bad_flag = factory_defaults().encode();
        bad_flag[SSID_LEN + PWD_LEN + 3 * CREDENTIAL_LEN + 2 * LABEL_LEN] = 7;
        let mut store = ConfigStore::new(MemoryMedium::with_image(bad_flag));
        assert!(!store.load());
        assert_eq!(store.medium().image().unwrap().len(), RECORD_LEN);

        assert!(matches!(
            PersistedConfig::decode(&[0xFF; RECORD_LEN]),
            Err(StoreError::InvalidField("ssid"))
        ));
    }

    #[test]
    fn empty_medium_is_reported_without_writing() {
        let mut store = ConfigStore::new(MemoryMedium::default());
        assert_eq!(store.load_outcome(), LoadOutcome::Empty);
        assert_eq!(store.medium().writes(), 0);

        assert!(store.factory_reset());
        assert!(store.load());
    }

    #[test]
    fn boot_load_initializes_empty_medium() {
        let mut store = ConfigStore::new(MemoryMedium::default());

        assert_eq!(store.load_or_init(), LoadOutcome::Empty);
        assert_eq!(store.medium().writes(), 1);
        assert_eq!(store.load_or_init(), LoadOutcome::Loaded);
        assert_eq!(store.medium().writes(), 1);
        assert!(store.is_factory_default());
    }

    #[test]
    fn consecutive_factory_resets_match() {
        let mut store = customized_store();
        assert!(store.factory_reset());
        let first = store.medium().image().unwrap().to_vec();
        assert!(store.factory_reset());

        assert_eq!(store.medium().image().unwrap(), first.as_slice());
        assert_eq!(store.medium().writes(), 2);
    }

    #[test]
    fn factory_default_check_compares_values() {
        let mut store = ConfigStore::new(MemoryMedium::default());
        assert!(store.is_factory_default());

        assert!(store.set_title("Garage"));
        assert!(!store.is_factory_default());

        assert!(store.set_title("Lumen"));
        assert!(store.is_factory_default());
    }

    #[test]
    fn oversized_values_are_rejected_without_side_effects() {
        let mut store = ConfigStore::new(MemoryMedium::default());
        let before = *store.config();

        assert!(!store.set_ssid(&"x".repeat(33)));
        assert!(!store.set_pwd(&"p".repeat(64)));
        assert!(!store.set_admin_user(&"u".repeat(51)));
        assert!(!store.set_title("nul\0inside"));
        assert!(!store.set_tz_offset(15));
        assert!(!store.set_tz_offset(-13));
        assert_eq!(*store.config(), before);

        assert!(store.set_ssid(&"x".repeat(32)));
        assert!(store.set_pwd(&"p".repeat(63)));
        assert_eq!(store.ssid().len(), 32);
        assert_eq!(store.pwd().len(), 63);
        assert_eq!(store.admin_user(), "admin");
    }

    #[test]
    fn separator_cannot_shift_between_fields() {
        let mut store = ConfigStore::new(MemoryMedium::default());
        let before = *store.config();

        assert!(!store.set_ssid("net\u{1f}"));
        assert!(!store.set_pwd("\u{1f}x"));
        assert!(!store.set_heading("two\nlines"));
        assert_eq!(*store.config(), before);

        let mut image = factory_defaults().encode();
        image[2] = 0x1F;
        assert!(matches!(
            PersistedConfig::decode(&image),
            Err(StoreError::InvalidField("ssid"))
        ));
    }

    struct Assignment {
        ssid: String,
        pwd: String,
        credential: String,
        label: String,
        tz_offset: i32,
        on_time: u16,
        off_time: u16,
        flags: bool,
    }

    #[test]
    fn boundary_assignments_survive_round_trip() {
        let cases = [
            Assignment {
                ssid: "s".repeat(SSID_LEN - 1),
                pwd: "p".repeat(PWD_LEN - 1),
                credential: "c".repeat(CREDENTIAL_LEN - 1),
                label: "l".repeat(LABEL_LEN - 1),
                tz_offset: MAX_TZ_OFFSET,
                on_time: 0,
                off_time: 2359,
                flags: true,
            },
            Assignment {
                ssid: String::new(),
                pwd: String::new(),
                credential: String::new(),
                label: String::new(),
                tz_offset: MIN_TZ_OFFSET,
                on_time: 2359,
                off_time: 0,
                flags: false,
            },
            Assignment {
                ssid: "Café-Net".to_string(),
                pwd: "ü".repeat((PWD_LEN - 1) / 2),
                credential: "ß".repeat((CREDENTIAL_LEN - 1) / 2),
                label: "é".repeat((LABEL_LEN - 1) / 2),
                tz_offset: 0,
                on_time: 1230,
                off_time: 1230,
                flags: true,
            },
        ];

        for case in &cases {
            let mut store = ConfigStore::new(MemoryMedium::default());
            assert!(store.set_ssid(&case.ssid));
            assert!(store.set_pwd(&case.pwd));
            assert!(store.set_admin_user(&case.credential));
            assert!(store.set_admin_pwd(&case.credential));
            assert!(store.set_ap_pwd(&case.credential));
            assert!(store.set_title(&case.label));
            assert!(store.set_heading(&case.label));
            assert!(store.set_tz_offset(case.tz_offset));
            store.set_on_time(t(case.on_time));
            store.set_off_time(t(case.off_time));
            store.set_timer_on(case.flags);
            store.set_lights_on(case.flags);
            store.set_dst(case.flags);
            assert!(store.save());

            let image = store.medium().image().unwrap().to_vec();
            let mut reloaded = ConfigStore::new(MemoryMedium::with_image(image));
            assert_eq!(reloaded.load_outcome(), LoadOutcome::Loaded);

            assert_eq!(*reloaded.config(), *store.config());
            assert_eq!(reloaded.ssid(), case.ssid);
            assert_eq!(reloaded.pwd(), case.pwd);
            assert_eq!(reloaded.ap_pwd(), case.credential);
            assert_eq!(reloaded.heading(), case.label);
            assert_eq!(reloaded.tz_offset(), case.tz_offset);
            assert_eq!(reloaded.on_time(), t(case.on_time));
            assert_eq!(reloaded.off_time(), t(case.off_time));
            assert_eq!(reloaded.is_dst(), case.flags);
        }
    }

    #[test]
    fn write_failure_keeps_in_memory_values() {
        let mut store = customized_store();
        store.medium_mut().fail_writes(true);

        assert!(!store.save());
        assert_eq!(store.title(), "Porch");
        assert!(store.medium().image().is_none());

        store.medium_mut().fail_writes(false);
        assert!(store.save());
    }

    #[test]
    fn station_credentials_require_both_fields() {
        let mut store = ConfigStore::new(MemoryMedium::default());
        assert!(!store.has_station_credentials());

        assert!(store.set_ssid("HomeNetwork"));
        assert!(!store.has_station_credentials());

        assert!(store.set_pwd("hunter22"));
        assert!(store.has_station_credentials());
    }
}
