//! Receiver timing and modem radio configuration

use crate::constants::{
    ACK_BASE_BACKOFF, ACK_REPEATS, DEFAULT_CHUNK_SIZE, MAX_RADIO_FRAME, MISS_BATCH_SIZE,
    MISS_INTERVAL, RETRANSMISSION_TIMEOUT, RX_SWITCH_DELAY, SEQ_SIZE,
};
use crate::error::LinkError;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;

/// Valid spreading factors accepted by the modem
pub const SPREADING_FACTORS: RangeInclusive<u8> = 6..=14;

/// Valid transmit power range in dBm
pub const POWER_DBM: RangeInclusive<i8> = 13..=22;

/// Baud rates the modem UART accepts
pub const BAUD_RATES: [u32; 8] = [9600, 14400, 19200, 38400, 57600, 76800, 115200, 230400];

/// Upper bound on acknowledgment repeats
pub const MAX_ACK_REPEATS: u32 = 16;

/// Upper bound on the first acknowledgment backoff
pub const MAX_ACK_BACKOFF_MS: u64 = 60_000;

/// Timing and protocol knobs of the receiving side
///
/// Every field has a default, so a partial TOML table is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReceiverConfig {
    /// Payload bytes per chunk; must match the sender
    pub chunk_size: u32,
    /// Inactivity before missing chunks are requested
    pub retransmission_timeout_ms: u64,
    /// Settling time between receive and transmit
    pub rx_switch_delay_ms: u64,
    /// Pause between MISS frames of one round
    pub miss_interval_ms: u64,
    /// Indices per MISS frame
    pub miss_batch_size: usize,
    /// Acknowledgments sent after completion
    pub ack_repeats: u32,
    /// First acknowledgment backoff, doubled per repeat
    pub ack_backoff_ms: u64,
    /// Abort after this many retransmission rounds; unbounded when unset
    pub max_retransmit_rounds: Option<u32>,
    /// Reopen the inbound stream when it ends mid-transfer
    pub reacquire_on_close: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retransmission_timeout_ms: RETRANSMISSION_TIMEOUT.as_millis() as u64,
            rx_switch_delay_ms: RX_SWITCH_DELAY.as_millis() as u64,
            miss_interval_ms: MISS_INTERVAL.as_millis() as u64,
            miss_batch_size: MISS_BATCH_SIZE,
            ack_repeats: ACK_REPEATS,
            ack_backoff_ms: ACK_BASE_BACKOFF.as_millis() as u64,
            max_retransmit_rounds: None,
            reacquire_on_close: true,
        }
    }
}

impl ReceiverConfig {
    /// Retransmission timeout as a duration
    pub fn retransmission_timeout(&self) -> Duration {
        Duration::from_millis(self.retransmission_timeout_ms)
    }

    /// Receive/transmit switch delay as a duration
    pub fn rx_switch_delay(&self) -> Duration {
        Duration::from_millis(self.rx_switch_delay_ms)
    }

    /// Inter-MISS delay as a duration
    pub fn miss_interval(&self) -> Duration {
        Duration::from_millis(self.miss_interval_ms)
    }

    /// Base acknowledgment backoff as a duration
    pub fn ack_backoff(&self) -> Duration {
        Duration::from_millis(self.ack_backoff_ms)
    }

    /// Check the values are usable
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.chunk_size == 0 || SEQ_SIZE + self.chunk_size as usize > MAX_RADIO_FRAME {
            return Err(LinkError::InvalidConfig(format!(
                "chunk_size {} must be between 1 and {}",
                self.chunk_size,
                MAX_RADIO_FRAME - SEQ_SIZE
            )));
        }
        if self.retransmission_timeout_ms == 0 {
            return Err(LinkError::InvalidConfig(
                "retransmission_timeout_ms must be positive".into(),
            ));
        }
        if self.miss_batch_size == 0 {
            return Err(LinkError::InvalidConfig(
                "miss_batch_size must be positive".into(),
            ));
        }
        if self.ack_repeats > MAX_ACK_REPEATS {
            return Err(LinkError::InvalidConfig(format!(
                "ack_repeats {} exceeds {}",
                self.ack_repeats, MAX_ACK_REPEATS
            )));
        }
        if self.ack_backoff_ms > MAX_ACK_BACKOFF_MS {
            return Err(LinkError::InvalidConfig(format!(
                "ack_backoff_ms {} exceeds {}",
                self.ack_backoff_ms, MAX_ACK_BACKOFF_MS
            )));
        }
        Ok(())
    }
}

/// Radio parameters sent to the modem before a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RfConfig {
    /// UART baud rate
    pub baud_rate: u32,
    /// Carrier frequency in MHz
    pub frequency_mhz: u32,
    /// LoRa spreading factor
    pub spreading_factor: u8,
    /// Bandwidth in kHz
    pub bandwidth_khz: u32,
    /// Transmit power in dBm
    pub power_dbm: i8,
    /// Ask the modem for debug logging instead of quiet mode
    pub verbose: bool,
}

impl Default for RfConfig {
    fn default() -> Self {
        Self {
            baud_rate: 230_400,
            frequency_mhz: 868,
            spreading_factor: 7,
            bandwidth_khz: 500,
            power_dbm: 14,
            verbose: false,
        }
    }
}

impl RfConfig {
    /// Check every parameter against the modem's accepted ranges
    pub fn validate(&self) -> Result<(), LinkError> {
        if !SPREADING_FACTORS.contains(&self.spreading_factor) {
            return Err(LinkError::InvalidConfig(format!(
                "spreading factor {} outside {:?}",
                self.spreading_factor, SPREADING_FACTORS
            )));
        }
        if !POWER_DBM.contains(&self.power_dbm) {
            return Err(LinkError::InvalidConfig(format!(
                "power {} dBm outside {:?}",
                self.power_dbm, POWER_DBM
            )));
        }
        if !BAUD_RATES.contains(&self.baud_rate) {
            return Err(LinkError::InvalidConfig(format!(
                "unsupported baud rate {}",
                self.baud_rate
            )));
        }
        Ok(())
    }

    /// The AT command sequence that puts the modem into packet-test mode
    pub fn commands(&self) -> Vec<String> {
        let log = if self.verbose { "DEBUG" } else { "QUIET" };
        vec![
            format!("AT+LOG={}", log),
            format!("AT+UART=BR, {}", self.baud_rate),
            String::from("AT+MODE=TEST"),
            format!(
                "AT+TEST=RFCFG,{},SF{},{},12,15,{},ON,OFF,OFF",
                self.frequency_mhz, self.spreading_factor, self.bandwidth_khz, self.power_dbm
            ),
        ]
    }
}
