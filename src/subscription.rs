//! Cyclic value subscriptions.
//!
//! A subscription is an object below the server session holding a reference
//! list of variable addresses. The device then pushes notifications carrying
//! `(reference_id, status, value)` entries, numbered by a credit tick. Once
//! the tick reaches the credit limit the device stops sending, so the limit
//! has to be raised ahead of time.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut subscription = Subscription::create(&mut client, tags, 100).await?;
//! loop {
//!     if let Some(notification) = client.poll_notification(Duration::from_secs(1)).await? {
//!         for reference_id in subscription.process(&mut client, &notification).await? {
//!             println!("{}", subscription.tag(reference_id).unwrap());
//!         }
//!     }
//! }
//! ```

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::client::{S7Client, DEFAULT_CREDIT_LIMIT, DEFAULT_CREDIT_STEP};
use crate::error::{Result, S7Error};
use crate::pdu::Notification;
use crate::tag::{PlcTag, TagStatus};
use crate::transport::Transport;
use crate::types::{ids, Object, Value};

/// Credit limit meaning "no flow control".
pub const CREDIT_UNLIMITED: i16 = -1;

/// Highest credit limit and step; ticks wrap at 255.
pub const CREDIT_MAX: i16 = 254;

// Opaque attribute defaults of a new subscription
const ROUTE_MODE: u8 = 0x04;
const REFERENCE_LIST_CREATE: u32 = 0x8000_0000;

/// Options of a new subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionConfig {
    /// Sampling cycle in milliseconds
    pub cycle_time_ms: u32,
    /// Delay before the first notification in milliseconds
    pub delay_time_ms: u32,
    /// Initial credit limit (-1 = unlimited)
    pub credit_limit: i16,
    /// Credit limit increment
    pub credit_step: i16,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            cycle_time_ms: 1000,
            delay_time_ms: 0,
            credit_limit: DEFAULT_CREDIT_LIMIT,
            credit_step: DEFAULT_CREDIT_STEP,
        }
    }
}

/// Credit-based flow control of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditControl {
    limit: i16,
    step: i16,
}

impl CreditControl {
    /// Fails unless `limit` is [`CREDIT_UNLIMITED`] or `0..=254` and `step`
    /// is `1..=254`.
    pub fn new(limit: i16, step: i16) -> Result<Self> {
        if limit != CREDIT_UNLIMITED && !(0..=CREDIT_MAX).contains(&limit) {
            return Err(S7Error::invalid_value(format!(
                "credit limit {limit} outside -1..={CREDIT_MAX}"
            )));
        }
        if !(1..=CREDIT_MAX).contains(&step) {
            return Err(S7Error::invalid_value(format!(
                "credit step {step} outside 1..={CREDIT_MAX}"
            )));
        }
        Ok(Self { limit, step })
    }

    /// Current limit.
    pub fn limit(&self) -> i16 {
        self.limit
    }

    /// Account for a received credit tick.
    ///
    /// Returns the new limit when the tick is within one of the current limit
    /// (or already past it). Ticks and limits wrap at 255.
    pub fn observe(&mut self, tick: u8) -> Option<i16> {
        if self.limit < 0 {
            return None;
        }
        let distance = (self.limit as u8).wrapping_sub(tick);
        if distance > 1 && distance <= 128 {
            return None;
        }
        self.limit = ((i32::from(self.limit) + i32::from(self.step)) % 255) as i16;
        Some(self.limit)
    }
}

/// A value subscription and the tags it feeds.
#[derive(Debug, Clone)]
pub struct Subscription {
    object_id: u32,
    config: SubscriptionConfig,
    change_counter: u8,
    next_reference_id: u32,
    tags: BTreeMap<u32, PlcTag>,
    credit: CreditControl,
}

impl Subscription {
    /// Subscribe to `tags` with the client's default credit settings.
    pub async fn create<T: Transport>(
        client: &mut S7Client<T>,
        tags: Vec<PlcTag>,
        cycle_time_ms: u32,
    ) -> Result<Self> {
        let config = SubscriptionConfig {
            cycle_time_ms,
            credit_limit: client.config().credit_limit,
            credit_step: client.config().credit_step,
            ..Default::default()
        };
        Self::create_with(client, tags, config).await
    }

    /// Subscribe to `tags`.
    pub async fn create_with<T: Transport>(
        client: &mut S7Client<T>,
        tags: Vec<PlcTag>,
        config: SubscriptionConfig,
    ) -> Result<Self> {
        if tags.is_empty() {
            return Err(S7Error::invalid_value("subscription without tags"));
        }
        let mut subscription = Self {
            object_id: 0,
            config,
            change_counter: 0,
            next_reference_id: 1,
            tags: BTreeMap::new(),
            credit: CreditControl::new(config.credit_limit, config.credit_step)?,
        };
        subscription.assign(tags);

        subscription.object_id = client.create_session_child(subscription.object()).await?;
        debug!(
            object_id = subscription.object_id,
            tags = subscription.tags.len(),
            cycle_ms = config.cycle_time_ms,
            "subscription created"
        );
        Ok(subscription)
    }

    /// Replace the subscribed tags.
    ///
    /// New reference ids continue after the highest one used so far, so a late
    /// notification for a removed tag is never routed to its replacement.
    pub async fn modify<T: Transport>(
        &mut self,
        client: &mut S7Client<T>,
        tags: Vec<PlcTag>,
    ) -> Result<()> {
        self.tags.clear();
        self.assign(tags);
        self.change_counter = self.change_counter.wrapping_add(1);
        client
            .set_variable(
                self.object_id,
                ids::SUBSCRIPTION_REFERENCE_LIST,
                self.reference_list(false),
            )
            .await?;
        debug!(
            object_id = self.object_id,
            change_counter = self.change_counter,
            "subscription modified"
        );
        Ok(())
    }

    /// Remove the subscription from the device.
    pub async fn delete<T: Transport>(&mut self, client: &mut S7Client<T>) -> Result<()> {
        self.tags.clear();
        client.delete_object(self.object_id).await
    }

    /// Apply a notification to the subscribed tags.
    ///
    /// Notifications for other subscriptions are ignored. Raises the credit
    /// limit when needed and returns the reference ids whose value changed.
    pub async fn process<T: Transport>(
        &mut self,
        client: &mut S7Client<T>,
        notification: &Notification,
    ) -> Result<Vec<u32>> {
        if notification.subscription_object_id != self.object_id {
            return Ok(Vec::new());
        }

        if let Some(limit) = self.credit.observe(notification.credit_tick) {
            debug!(
                object_id = self.object_id,
                tick = notification.credit_tick,
                limit,
                "raising credit limit"
            );
            client
                .set_variable_no_response(
                    self.object_id,
                    ids::SUBSCRIPTION_CREDIT_LIMIT,
                    Value::Int(limit),
                )
                .await?;
        }

        let mut updated = Vec::with_capacity(notification.values.len());
        for entry in &notification.values {
            let Some(tag) = self.tags.get_mut(&entry.reference_id) else {
                warn!(reference_id = entry.reference_id, "notification for unknown reference id");
                continue;
            };
            match &entry.value {
                Some(value) => match tag.apply_wire(value) {
                    Ok(()) => updated.push(entry.reference_id),
                    Err(e) => warn!(tag = %tag.name, error = %e, "notification value rejected"),
                },
                None => tag.status = TagStatus::NotificationStatus(entry.status),
            }
        }
        Ok(updated)
    }

    /// Device object id.
    pub fn object_id(&self) -> u32 {
        self.object_id
    }

    pub fn change_counter(&self) -> u8 {
        self.change_counter
    }

    pub fn credit(&self) -> &CreditControl {
        &self.credit
    }

    /// Tag subscribed under `reference_id`.
    pub fn tag(&self, reference_id: u32) -> Option<&PlcTag> {
        self.tags.get(&reference_id)
    }

    /// Subscribed tags by reference id.
    pub fn tags(&self) -> impl Iterator<Item = (u32, &PlcTag)> {
        self.tags.iter().map(|(id, tag)| (*id, tag))
    }

    fn assign(&mut self, tags: Vec<PlcTag>) {
        for tag in tags {
            self.tags.insert(self.next_reference_id, tag);
            self.next_reference_id += 1;
        }
    }

    /// Reference list attribute.
    ///
    /// Header `create << 31 | change_counter << 16 | count`, then per tag:
    /// reference id, LID count + 1, access area, symbol CRC, sub-area, LIDs.
    pub(crate) fn reference_list(&self, create: bool) -> Value {
        let mut list = Vec::with_capacity(1 + self.tags.len() * 6);
        let flag = if create { REFERENCE_LIST_CREATE } else { 0 };
        list.push(flag | (u32::from(self.change_counter) << 16) | self.tags.len() as u32);
        for (reference_id, tag) in &self.tags {
            let address = &tag.address;
            list.push(*reference_id);
            list.push(address.lids.len() as u32 + 1);
            list.push(address.access_area);
            list.push(address.symbol_crc);
            list.push(address.access_sub_area);
            list.extend_from_slice(&address.lids);
        }
        Value::udint_array(&list)
    }

    fn object(&self) -> Object {
        Object::new(ids::SUBSCRIPTION_RELATION_SEED, ids::CLASS_SUBSCRIPTION, 0)
            .with_attribute(ids::SUBSCRIPTION_MISSED_SENDINGS, Value::UInt(0))
            .with_attribute(ids::SUBSCRIPTION_SUBSYSTEM_ERROR, Value::LWord(0))
            .with_attribute(ids::SUBSCRIPTION_ROUTE_MODE, Value::USInt(ROUTE_MODE))
            .with_attribute(ids::SUBSCRIPTION_ACTIVE, Value::Bool(true))
            .with_attribute(ids::SUBSCRIPTION_REFERENCE_LIST, self.reference_list(true))
            .with_attribute(ids::SUBSCRIPTION_CYCLE_TIME, Value::UDInt(self.config.cycle_time_ms))
            .with_attribute(ids::SUBSCRIPTION_DELAY_TIME, Value::UDInt(self.config.delay_time_ms))
            .with_attribute(ids::SUBSCRIPTION_DISABLED, Value::Bool(false))
            .with_attribute(ids::SUBSCRIPTION_CREDIT_LIMIT, Value::Int(self.config.credit_limit))
    }
}
