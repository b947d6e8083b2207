//! Alarms: subscriptions, instance records and the alarm text catalogue.
//!
//! Alarm notifications carry [`Dai`] objects describing the coming and going
//! of an alarm. Static data and texts are not part of the notification; they
//! come from the program objects (MultipleSTAI blobs) and the text library,
//! collected once by [`AlarmCatalog::browse`] and joined by CPU alarm id.

pub mod records;
pub mod text;

use std::collections::BTreeMap;

use tracing::{debug, warn};

pub use records::{cpu_alarm_id, AlarmState, Dai, HmiInfo, StaiRecord};
pub use text::AlarmTexts;

use crate::client::S7Client;
use crate::error::Result;
use crate::pdu::{ExploreRequest, Notification};
use crate::subscription::CreditControl;
use crate::transport::Transport;
use crate::types::{ids, Object, Value};

/// Language id of English (United States).
pub const LANGUAGE_EN_US: u32 = 1033;

// Opaque route mode of alarm subscriptions
const ALARM_ROUTE_MODE: u8 = 0x14;

/// Options of an alarm subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmSubscriptionConfig {
    /// Alarm domain to receive
    pub alarm_domain: u16,
    /// Ask the device to include alarm texts
    pub send_alarm_texts: bool,
    /// Text languages
    pub languages: Vec<u32>,
    /// Initial credit limit (-1 = unlimited)
    pub credit_limit: i16,
    /// Credit limit increment
    pub credit_step: i16,
}

impl Default for AlarmSubscriptionConfig {
    fn default() -> Self {
        Self {
            alarm_domain: 1,
            send_alarm_texts: false,
            languages: vec![LANGUAGE_EN_US],
            credit_limit: crate::client::DEFAULT_CREDIT_LIMIT,
            credit_step: crate::client::DEFAULT_CREDIT_STEP,
        }
    }
}

fn collect_class<'a>(objects: &'a [Object], class_id: u32, found: &mut Vec<&'a Object>) {
    for object in objects {
        if object.class_id == class_id {
            found.push(object);
        }
        collect_class(object.objects(), class_id, found);
    }
}

fn find_class(objects: &[Object], class_id: u32) -> Option<&Object> {
    objects.iter().find_map(|object| {
        if object.class_id == class_id {
            Some(object)
        } else {
            find_class(object.objects(), class_id)
        }
    })
}

/// Subscription to the alarm subsystem.
#[derive(Debug, Clone)]
pub struct AlarmSubscription {
    object_id: u32,
    config: AlarmSubscriptionConfig,
    credit: CreditControl,
}

impl AlarmSubscription {
    /// Subscribe to the alarms of `config.alarm_domain`.
    pub async fn create<T: Transport>(
        client: &mut S7Client<T>,
        config: AlarmSubscriptionConfig,
    ) -> Result<Self> {
        let mut subscription = Self {
            object_id: 0,
            credit: CreditControl::new(config.credit_limit, config.credit_step)?,
            config,
        };
        subscription.object_id = client.create_session_child(subscription.object()).await?;
        debug!(
            object_id = subscription.object_id,
            domain = subscription.config.alarm_domain,
            "alarm subscription created"
        );
        Ok(subscription)
    }

    /// Device object id.
    pub fn object_id(&self) -> u32 {
        self.object_id
    }

    pub fn credit(&self) -> &CreditControl {
        &self.credit
    }

    /// Extract alarm instances from a notification.
    ///
    /// Notifications for other subscriptions yield nothing. Instances that do
    /// not decode are skipped with a warning.
    pub async fn process<T: Transport>(
        &mut self,
        client: &mut S7Client<T>,
        notification: &Notification,
    ) -> Result<Vec<Dai>> {
        if notification.subscription_object_id != self.object_id {
            return Ok(Vec::new());
        }
        if let Some(limit) = self.credit.observe(notification.credit_tick) {
            debug!(object_id = self.object_id, limit, "raising alarm credit limit");
            client
                .set_variable_no_response(
                    self.object_id,
                    ids::SUBSCRIPTION_CREDIT_LIMIT,
                    Value::Int(limit),
                )
                .await?;
        }

        let mut objects = Vec::new();
        collect_class(&notification.objects, ids::CLASS_DAI, &mut objects);
        let mut alarms = Vec::with_capacity(objects.len());
        for object in objects {
            match Dai::from_object(object) {
                Ok(dai) => alarms.push(dai),
                Err(e) => warn!(
                    relation_id = object.relation_id,
                    error = %e,
                    "alarm instance rejected"
                ),
            }
        }
        Ok(alarms)
    }

    /// Remove the subscription from the device.
    pub async fn delete<T: Transport>(&mut self, client: &mut S7Client<T>) -> Result<()> {
        client.delete_object(self.object_id).await
    }

    fn object(&self) -> Object {
        let reference = Object::new(
            ids::GET_NEW_RID_ON_SERVER,
            ids::CLASS_ALARM_SUBSCRIPTION_REF,
            0,
        )
        .with_attribute(
            ids::ALARM_SUBSCRIPTION_REF_ALARM_DOMAIN,
            Value::UInt(self.config.alarm_domain),
        )
        .with_attribute(
            ids::ALARM_SUBSCRIPTION_REF_SEND_ALARM_TEXTS,
            Value::Bool(self.config.send_alarm_texts),
        )
        .with_attribute(
            ids::ALARM_SUBSCRIPTION_REF_ALARM_TEXT_LANGUAGES,
            Value::udint_array(&self.config.languages),
        )
        .with_relation(
            ids::ALARM_SUBSCRIPTION_REF_ITS_ALARM_SUBSYSTEM,
            ids::NATIVE_OBJECTS_THE_ALARM_SUBSYSTEM_RID,
        );

        Object::new(ids::ALARM_SUBSCRIPTION_RELATION_SEED, ids::CLASS_SUBSCRIPTION, 0)
            .with_attribute(ids::SUBSCRIPTION_ROUTE_MODE, Value::USInt(ALARM_ROUTE_MODE))
            .with_attribute(ids::SUBSCRIPTION_ACTIVE, Value::Bool(true))
            .with_attribute(ids::SUBSCRIPTION_DISABLED, Value::Bool(false))
            .with_attribute(ids::SUBSCRIPTION_CREDIT_LIMIT, Value::Int(self.config.credit_limit))
            .with_object(reference)
    }
}

/// Static data and texts of one alarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmData {
    /// Relation id of the program block defining the alarm.
    pub relation_id: u32,
    pub cpu_alarm_id: u64,
    pub stai: StaiRecord,
    pub texts: Option<AlarmTexts>,
}

/// Alarms defined in the PLC program, keyed by CPU alarm id.
#[derive(Debug, Clone, Default)]
pub struct AlarmCatalog {
    alarms: BTreeMap<u64, AlarmData>,
    unmatched_texts: Vec<u64>,
}

impl AlarmCatalog {
    /// Explore the program for alarm definitions and load their texts.
    pub async fn browse<T: Transport>(client: &mut S7Client<T>) -> Result<Self> {
        let program = client
            .explore(
                &ExploreRequest::new(ids::NATIVE_OBJECTS_THE_PLC_PROGRAM_RID)
                    .with_attributes(&[ids::MULTIPLE_STAI]),
            )
            .await?;
        let library = client
            .explore(
                &ExploreRequest::new(ids::NATIVE_OBJECTS_THE_ALARM_SUBSYSTEM_RID).with_attributes(&[
                    ids::TEXT_LIBRARY_OFFSET_AREA,
                    ids::TEXT_LIBRARY_STRING_AREA,
                ]),
            )
            .await?;

        let catalog = Self::from_objects(
            &program.objects,
            find_class(&library.objects, ids::CLASS_TEXT_LIBRARY),
        );
        debug!(alarms = catalog.len(), "alarm catalogue loaded");
        Ok(catalog)
    }

    /// Build from explored program objects and the text library object.
    pub fn from_objects(program: &[Object], library: Option<&Object>) -> Self {
        let texts = match library {
            Some(library) => load_texts(library),
            None => {
                warn!("no text library found");
                BTreeMap::new()
            }
        };

        let mut alarms = BTreeMap::new();
        let mut stack: Vec<&Object> = program.iter().collect();
        while let Some(object) = stack.pop() {
            stack.extend(object.objects());
            let Some(Value::Blob(blob)) = object.attribute(ids::MULTIPLE_STAI) else {
                continue;
            };
            let records = match records::decode_multiple_stai(&blob.data) {
                Ok(records) => records,
                Err(e) => {
                    warn!(relation_id = object.relation_id, error = %e, "MultipleSTAI rejected");
                    continue;
                }
            };
            for stai in records {
                let id = cpu_alarm_id(object.relation_id, stai.alid);
                alarms.insert(
                    id,
                    AlarmData {
                        relation_id: object.relation_id,
                        cpu_alarm_id: id,
                        texts: texts.get(&id).cloned(),
                        stai,
                    },
                );
            }
        }

        let unmatched_texts: Vec<u64> = texts
            .keys()
            .filter(|id| !alarms.contains_key(id))
            .copied()
            .collect();
        for id in &unmatched_texts {
            warn!(cpu_alarm_id = *id, "alarm texts without a matching alarm skipped");
        }
        Self {
            alarms,
            unmatched_texts,
        }
    }

    /// CPU alarm ids of text library entries no alarm refers to.
    pub fn unmatched_texts(&self) -> &[u64] {
        &self.unmatched_texts
    }

    pub fn get(&self, cpu_alarm_id: u64) -> Option<&AlarmData> {
        self.alarms.get(&cpu_alarm_id)
    }

    /// Texts of the alarm an instance belongs to.
    pub fn texts(&self, dai: &Dai) -> Option<&AlarmTexts> {
        self.get(dai.cpu_alarm_id)?.texts.as_ref()
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlarmData> {
        self.alarms.values()
    }
}

fn load_texts(library: &Object) -> BTreeMap<u64, AlarmTexts> {
    let area = |id| match library.attribute(id) {
        Some(Value::Blob(blob)) => Some(blob.data.clone()),
        _ => None,
    };
    let (Some(offsets), Some(strings)) = (
        area(ids::TEXT_LIBRARY_OFFSET_AREA),
        area(ids::TEXT_LIBRARY_STRING_AREA),
    ) else {
        warn!("text library without offset or string area");
        return BTreeMap::new();
    };
    text::resolve(&offsets, &strings).unwrap_or_else(|e| {
        warn!(error = %e, "text library unreadable");
        BTreeMap::new()
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ConnectionState;
    use crate::error::S7Error;
    use crate::pdu::{CreateObjectResponse, ExploreResponse, FunctionCode};
    use crate::transport::mock::{connected_client, MockRequest, SESSION_ID};

    const ALARM_SUBSCRIPTION_ID: u32 = 0x7000_0030;

    fn device(request: &MockRequest) -> Vec<crate::codec::Frame> {
        match request.header.function_code {
            FunctionCode::CreateObject => vec![request.reply(&CreateObjectResponse {
                return_value: 0,
                object_ids: vec![ALARM_SUBSCRIPTION_ID],
                objects: vec![],
            })],
            FunctionCode::Explore => {
                let explore_id = request.in_object_id();
                let objects = match explore_id {
                    ids::NATIVE_OBJECTS_THE_PLC_PROGRAM_RID => vec![Object::new(explore_id, 1, 0)
                        .with_object(fixtures::program_block(fixtures::RELATION_ID, &[5, 6]))],
                    ids::NATIVE_OBJECTS_THE_ALARM_SUBSYSTEM_RID => {
                        vec![fixtures::text_library_object()]
                    }
                    _ => vec![],
                };
                vec![request.reply(&ExploreResponse {
                    return_value: 0,
                    explore_id,
                    objects,
                })]
            }
            _ => vec![],
        }
    }

    #[test]
    fn test_subscription_object() {
        let subscription = AlarmSubscription {
            object_id: 0,
            config: AlarmSubscriptionConfig {
                alarm_domain: 3,
                ..Default::default()
            },
            credit: CreditControl::new(10, 10).unwrap(),
        };
        let object = subscription.object();
        assert_eq!(object.relation_id, ids::ALARM_SUBSCRIPTION_RELATION_SEED);
        assert_eq!(object.class_id, ids::CLASS_SUBSCRIPTION);

        let reference = object
            .first_object_by_class_id(ids::CLASS_ALARM_SUBSCRIPTION_REF)
            .unwrap();
        assert_eq!(
            reference.attribute(ids::ALARM_SUBSCRIPTION_REF_ALARM_DOMAIN),
            Some(&Value::UInt(3))
        );
        assert_eq!(
            reference.relations(),
            &[(
                ids::ALARM_SUBSCRIPTION_REF_ITS_ALARM_SUBSYSTEM,
                ids::NATIVE_OBJECTS_THE_ALARM_SUBSYSTEM_RID
            )]
        );
    }

    #[test]
    fn test_catalog_joins_texts() {
        let program = vec![fixtures::program_block(fixtures::RELATION_ID, &[5, 6])];
        let library = fixtures::text_library_object();
        let catalog = AlarmCatalog::from_objects(&program, Some(&library));

        assert_eq!(catalog.len(), 2);
        let pump = catalog.get(cpu_alarm_id(fixtures::RELATION_ID, 5)).unwrap();
        assert_eq!(pump.stai.alid, 5);
        assert_eq!(
            pump.texts.as_ref().unwrap().alarm_text.as_deref(),
            Some("Pump failure")
        );
        // Alarm 6 has no texts in the library
        assert!(catalog.get(cpu_alarm_id(fixtures::RELATION_ID, 6)).unwrap().texts.is_none());

        assert!(catalog.unmatched_texts().is_empty());

        let without_library = AlarmCatalog::from_objects(&program, None);
        assert_eq!(without_library.len(), 2);
        assert!(without_library.iter().all(|alarm| alarm.texts.is_none()));
    }

    #[test]
    fn test_catalog_skips_texts_without_alarm() {
        // Library holds texts for alarm 5, the program only defines alarm 6
        let program = vec![fixtures::program_block(fixtures::RELATION_ID, &[6])];
        let library = fixtures::text_library_object();
        let catalog = AlarmCatalog::from_objects(&program, Some(&library));

        assert_eq!(catalog.len(), 1);
        assert!(catalog.iter().all(|alarm| alarm.texts.is_none()));
        assert_eq!(
            catalog.unmatched_texts(),
            &[cpu_alarm_id(fixtures::RELATION_ID, 5)]
        );
    }

    #[tokio::test]
    async fn test_browse_catalog() {
        let mut client = connected_client(device).await;
        let catalog = AlarmCatalog::browse(&mut client).await.unwrap();

        assert_eq!(client.transport().count(FunctionCode::Explore), 2);
        let dai = Dai::from_object(&fixtures::dai(cpu_alarm_id(fixtures::RELATION_ID, 5))).unwrap();
        assert_eq!(
            catalog.texts(&dai).unwrap().alarm_text.as_deref(),
            Some("Pump failure")
        );
    }

    #[tokio::test]
    async fn test_failed_alarm_subscription_faults_session() {
        let mut client = connected_client(|request| match request.header.function_code {
            FunctionCode::CreateObject => vec![request.reply(&CreateObjectResponse {
                return_value: 0x8000_0000_0000_0011,
                object_ids: vec![],
                objects: vec![],
            })],
            _ => vec![],
        })
        .await;

        let config = AlarmSubscriptionConfig::default();
        let result = AlarmSubscription::create(&mut client, config).await;
        assert!(matches!(result, Err(S7Error::Device { .. })));
        assert_eq!(client.state(), ConnectionState::Faulted);
        assert!(client.transport().closed);
    }

    #[tokio::test]
    async fn test_alarm_credit_settings_validated() {
        let mut client = connected_client(device).await;
        let config = AlarmSubscriptionConfig {
            credit_step: 0,
            ..Default::default()
        };
        assert!(matches!(
            AlarmSubscription::create(&mut client, config).await,
            Err(S7Error::InvalidValue(_))
        ));
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_alarm_notification() {
        let mut client = connected_client(device).await;
        let mut subscription =
            AlarmSubscription::create(&mut client, AlarmSubscriptionConfig::default())
                .await
                .unwrap();
        assert_eq!(subscription.object_id(), ALARM_SUBSCRIPTION_ID);
        assert_eq!(client.transport().requests.last().unwrap().in_object_id(), SESSION_ID);

        let broken = Object::new(1, ids::CLASS_DAI, 0);
        let notification = Notification {
            subscription_object_id: ALARM_SUBSCRIPTION_ID,
            credit_tick: 9,
            objects: vec![
                fixtures::dai(cpu_alarm_id(fixtures::RELATION_ID, 5)),
                broken,
            ],
            ..Default::default()
        };
        let alarms = subscription.process(&mut client, &notification).await.unwrap();

        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].alid(), 5);
        assert_eq!(subscription.credit().limit(), 20);
        let credit = client.transport().requests.last().unwrap();
        assert_eq!(credit.variable_address(), Some(ids::SUBSCRIPTION_CREDIT_LIMIT));
        assert_eq!(credit.written_value(), Some(Value::Int(20)));
    }
}
