// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Retry Ledger
//!
//! Derivation of a message's attempt count from broker state. No attempt
//! counter is kept in process memory or in custom headers: every delivery
//! re-derives the count from the death-history header the broker maintains,
//! which makes the retry cycle survive process restarts for free.
//!
//! The `RetryLedger` trait hides the header format so another transport can
//! supply its own derivation strategy without touching the pipeline.

use crate::message::InboundMessage;
use lapin::types::FieldTable;

/// Constant for the x-death header maintained by the broker
pub const AMQP_HEADERS_X_DEATH: &str = "x-death";
/// Constant for the count field in an x-death record
pub const AMQP_HEADERS_COUNT: &str = "count";
/// Constant for the reason field in an x-death record
pub const AMQP_HEADERS_REASON: &str = "reason";

/// Death reason written by the broker when a delivery is rejected
const DEATH_REASON_REJECTED: &[u8] = b"rejected";

/// Derives how many times a message has already been attempted.
#[cfg_attr(test, mockall::automock)]
pub trait RetryLedger: Send + Sync {
    /// The effective attempt count for the current delivery, starting at 0
    /// for a first delivery.
    fn attempts(&self, message: &InboundMessage) -> u64;
}

/// `RetryLedger` reading the broker's death-history header.
///
/// The first record with `reason == "rejected"` holds the number of times
/// the message was rejected before the current delivery, so the effective
/// attempt count is that record's `count + 1`. A message without such a
/// record is on its first attempt.
pub struct DeathHeaderLedger;

impl RetryLedger for DeathHeaderLedger {
    fn attempts(&self, message: &InboundMessage) -> u64 {
        match rejected_death_count(message.properties.headers()) {
            Some(count) => count + 1,
            None => 0,
        }
    }
}

/// Extracts the count of the first `rejected` record from the x-death header.
fn rejected_death_count(headers: &Option<FieldTable>) -> Option<u64> {
    let headers = headers.as_ref()?;
    let deaths = headers.inner().get(AMQP_HEADERS_X_DEATH)?.as_array()?;

    deaths
        .as_slice()
        .iter()
        .filter_map(|entry| entry.as_field_table())
        .find(|record| {
            record
                .inner()
                .get(AMQP_HEADERS_REASON)
                .and_then(|reason| reason.as_long_string())
                .map(|reason| reason.as_bytes() == DEATH_REASON_REJECTED)
                .unwrap_or(false)
        })
        .and_then(|record| record.inner().get(AMQP_HEADERS_COUNT))
        .and_then(|count| count.as_long_long_int())
        .map(|count| count.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{InboundMessage, MockMessageHandle};
    use lapin::types::{AMQPValue, FieldArray, LongString, ShortString};
    use lapin::BasicProperties;
    use std::sync::Arc;

    fn death_record(reason: &str, count: i64) -> AMQPValue {
        let mut record = FieldTable::default();
        record.insert(
            ShortString::from(AMQP_HEADERS_REASON),
            AMQPValue::LongString(LongString::from(reason)),
        );
        record.insert(
            ShortString::from(AMQP_HEADERS_COUNT),
            AMQPValue::LongLongInt(count),
        );
        AMQPValue::FieldTable(record)
    }

    fn message_with_deaths(records: Vec<AMQPValue>) -> InboundMessage {
        let mut headers = FieldTable::default();
        headers.insert(
            ShortString::from(AMQP_HEADERS_X_DEATH),
            AMQPValue::FieldArray(FieldArray::from(records)),
        );

        InboundMessage::new(
            vec![],
            BasicProperties::default().with_headers(headers),
            "main-router".to_owned(),
            "orders".to_owned(),
            1,
            "orders".to_owned(),
            Arc::new(MockMessageHandle::new()),
        )
    }

    #[test]
    fn first_delivery_has_zero_attempts() {
        let message = InboundMessage::new(
            vec![],
            BasicProperties::default(),
            "main-router".to_owned(),
            "orders".to_owned(),
            1,
            "orders".to_owned(),
            Arc::new(MockMessageHandle::new()),
        );

        assert_eq!(DeathHeaderLedger.attempts(&message), 0);
    }

    #[test]
    fn rejected_count_plus_one() {
        let message = message_with_deaths(vec![death_record("rejected", 2)]);
        assert_eq!(DeathHeaderLedger.attempts(&message), 3);
    }

    #[test]
    fn non_rejected_records_are_skipped() {
        let message = message_with_deaths(vec![
            death_record("expired", 7),
            death_record("rejected", 1),
        ]);
        assert_eq!(DeathHeaderLedger.attempts(&message), 2);
    }

    #[test]
    fn only_the_first_rejected_record_counts() {
        let message = message_with_deaths(vec![
            death_record("rejected", 1),
            death_record("rejected", 5),
        ]);
        assert_eq!(DeathHeaderLedger.attempts(&message), 2);
    }

    #[test]
    fn deaths_without_rejections_mean_first_attempt() {
        let message = message_with_deaths(vec![death_record("expired", 4)]);
        assert_eq!(DeathHeaderLedger.attempts(&message), 0);
    }
}
