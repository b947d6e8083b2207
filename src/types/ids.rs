//! Numeric object, class and attribute identifiers.
//!
//! These are fixed catalog values of the device object model. Their meaning
//! beyond the name is not documented by the vendor; treat them as opaque.

// Objects and classes of the session
pub const OBJECT_ROOT: u32 = 201;
pub const GET_NEW_RID_ON_SERVER: u32 = 211;
pub const OBJECT_VARIABLE_TYPE_NAME: u32 = 233;
pub const CLASS_SUBSCRIPTIONS: u32 = 255;
pub const CLASS_SERVER_SESSION_CONTAINER: u32 = 284;
pub const OBJECT_SERVER_SESSION_CONTAINER: u32 = 285;
pub const CLASS_SERVER_SESSION: u32 = 287;
pub const OBJECT_NULL_SERVER_SESSION: u32 = 288;
pub const SERVER_SESSION_CLIENT_RID: u32 = 300;
pub const SERVER_SESSION_REQUEST: u32 = 303;
pub const SERVER_SESSION_RESPONSE: u32 = 304;
pub const SERVER_SESSION_VERSION: u32 = 306;
pub const SERVER_SESSION_VERSION_STRUCT: u32 = 314;
pub const LID_SESSION_VERSION_SYSTEM_PAOM_STRING: u32 = 319;

// Object model attributes
pub const OBJECT_QUALIFIER: u32 = 1256;
pub const PARENT_RID: u32 = 1257;
pub const COMPOSITION_AID: u32 = 1258;
pub const KEY_QUALIFIER: u32 = 1259;
pub const OBJECT_VARIABLE_TYPE_PARENT_OBJECT: u32 = 4002;

// Protection and legitimation
pub const EFFECTIVE_PROTECTION_LEVEL: u32 = 1842;
pub const ACTIVE_PROTECTION_LEVEL: u32 = 1843;
pub const LEGITIMATE: u32 = 1846;
pub const LEGITIMATION_PAYLOAD_STRUCT: u32 = 40400;
pub const LEGITIMATION_PAYLOAD_TYPE: u32 = 40401;
pub const LEGITIMATION_PAYLOAD_USERNAME: u32 = 40402;
pub const LEGITIMATION_PAYLOAD_PASSWORD: u32 = 40403;

// Native objects
pub const NATIVE_OBJECTS_THE_PLC_PROGRAM_RID: u32 = 3;
pub const NATIVE_OBJECTS_THE_ALARM_SUBSYSTEM_RID: u32 = 8;
pub const NATIVE_OBJECTS_THE_I_AREA_RID: u32 = 80;
pub const NATIVE_OBJECTS_THE_Q_AREA_RID: u32 = 81;
pub const NATIVE_OBJECTS_THE_M_AREA_RID: u32 = 82;
pub const NATIVE_OBJECTS_THE_S7_COUNTERS_RID: u32 = 83;
pub const NATIVE_OBJECTS_THE_S7_TIMERS_RID: u32 = 84;

// Variable access
pub const DB_VALUE_ACTUAL: u32 = 2550;
pub const CONTROLLER_AREA_VALUE_ACTUAL: u32 = 2551;
/// Access area of data block N is `DB_ACCESS_AREA_BASE + N`.
pub const DB_ACCESS_AREA_BASE: u32 = 0x8A0E_0000;

// Text library
pub const CLASS_TEXT_LIBRARY: u32 = 606;
pub const TEXT_LIBRARY_OFFSET_AREA: u32 = 608;
pub const TEXT_LIBRARY_STRING_AREA: u32 = 609;

// Subscriptions
pub const CLASS_SUBSCRIPTION: u32 = 1001;
pub const SUBSCRIPTION_MISSED_SENDINGS: u32 = 1002;
pub const SUBSCRIPTION_SUBSYSTEM_ERROR: u32 = 1003;
pub const SUBSCRIPTION_REFERENCE_TRIGGER_AND_TRANSMIT_MODE: u32 = 1005;
pub const SUBSCRIPTION_ROUTE_MODE: u32 = 1040;
pub const SUBSCRIPTION_ACTIVE: u32 = 1041;
pub const SUBSCRIPTION_REFERENCE_LIST: u32 = 1048;
pub const SUBSCRIPTION_CYCLE_TIME: u32 = 1049;
pub const SUBSCRIPTION_DELAY_TIME: u32 = 1050;
pub const SUBSCRIPTION_DISABLED: u32 = 1051;
pub const SUBSCRIPTION_COUNT: u32 = 1052;
pub const SUBSCRIPTION_CREDIT_LIMIT: u32 = 1053;
pub const SUBSCRIPTION_TICKS: u32 = 1054;
pub const FREE_ITEMS: u32 = 1081;
pub const SUBSCRIPTION_FUNCTION_CLASS_ID: u32 = 1082;

// Alarm subscriptions
pub const CLASS_ALARM_SUBSCRIPTION_REF: u32 = 7854;
pub const ALARM_SUBSCRIPTION_REF_ALARM_DOMAIN: u32 = 7855;
pub const ALARM_SUBSCRIPTION_REF_ITS_ALARM_SUBSYSTEM: u32 = 7856;
pub const ALARM_SUBSCRIPTION_REF_ALARM_DOMAIN2: u32 = 7857;
pub const ALARM_SUBSCRIPTION_REF_SEND_ALARM_TEXTS: u32 = 7858;
pub const ALARM_SUBSCRIPTION_REF_ALARM_TEXT_LANGUAGES: u32 = 7860;

// Alarm instances (DAI)
pub const CLASS_DAI: u32 = 7830;
pub const DAI_CPU_ALARM_ID: u32 = 3474;
pub const DAI_ALL_STATES_INFO: u32 = 3475;
pub const DAI_ALARM_DOMAIN: u32 = 3476;
pub const DAI_COMING: u32 = 3477;
pub const DAI_GOING: u32 = 3478;
pub const DAI_CLASS: u32 = 3479;
pub const DAI_FREE_INFO: u32 = 3480;
pub const DAI_AID_COUNT: u32 = 3481;
pub const DAI_SUBCLASS_NR: u32 = 3482;
pub const DAI_MESSAGE_TYPE: u32 = 4079;
pub const DAI_HMI_INFO: u32 = 7813;
pub const DAI_SEQUENCE_COUNTER: u32 = 7853;

// Coming/going state struct
pub const AS_CGS: u32 = 3536;
pub const AS_CGS_ALL_STATES_INFO: u32 = 3537;
pub const AS_CGS_TIMESTAMP: u32 = 3538;
pub const AS_CGS_ASSOCIATED_VALUES: u32 = 3539;
pub const AS_CGS_ACK_TIMESTAMP: u32 = 3540;

// Static alarm data
pub const MULTIPLE_STAI: u32 = 7859;

// Relation id seeds
pub const CLIENT_RID_SEED: u32 = 0x80C3_C901;
pub const SUBSCRIPTION_RELATION_SEED: u32 = 0x7FFF_C001;
pub const ALARM_SUBSCRIPTION_RELATION_SEED: u32 = 0x7FFF_8001;
