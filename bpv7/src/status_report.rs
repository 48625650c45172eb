/*!
Status report and custody signal reason codes.
*/

/// The reason assigned to a bundle status report, as assigned by the
/// IANA Bundle Status Report Reason Codes registry.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReasonCode {
    #[default]
    NoAdditionalInformation,
    LifetimeExpired,
    ForwardedOverUnidirectionalLink,
    TransmissionCanceled,
    DepletedStorage,
    DestinationEndpointUnintelligible,
    NoRouteToDestination,
    NoTimelyContactWithNextNode,
    BlockUnintelligible,
    HopLimitExceeded,
    TrafficPared,
    BlockUnsupported,
    Unassigned(u64),
}

impl From<ReasonCode> for u64 {
    fn from(value: ReasonCode) -> Self {
        match value {
            ReasonCode::NoAdditionalInformation => 0,
            ReasonCode::LifetimeExpired => 1,
            ReasonCode::ForwardedOverUnidirectionalLink => 2,
            ReasonCode::TransmissionCanceled => 3,
            ReasonCode::DepletedStorage => 4,
            ReasonCode::DestinationEndpointUnintelligible => 5,
            ReasonCode::NoRouteToDestination => 6,
            ReasonCode::NoTimelyContactWithNextNode => 7,
            ReasonCode::BlockUnintelligible => 8,
            ReasonCode::HopLimitExceeded => 9,
            ReasonCode::TrafficPared => 10,
            ReasonCode::BlockUnsupported => 11,
            ReasonCode::Unassigned(v) => v,
        }
    }
}

impl From<u64> for ReasonCode {
    fn from(value: u64) -> Self {
        match value {
            0 => ReasonCode::NoAdditionalInformation,
            1 => ReasonCode::LifetimeExpired,
            2 => ReasonCode::ForwardedOverUnidirectionalLink,
            3 => ReasonCode::TransmissionCanceled,
            4 => ReasonCode::DepletedStorage,
            5 => ReasonCode::DestinationEndpointUnintelligible,
            6 => ReasonCode::NoRouteToDestination,
            7 => ReasonCode::NoTimelyContactWithNextNode,
            8 => ReasonCode::BlockUnintelligible,
            9 => ReasonCode::HopLimitExceeded,
            10 => ReasonCode::TrafficPared,
            11 => ReasonCode::BlockUnsupported,
            value => ReasonCode::Unassigned(value),
        }
    }
}

/// Custody signal reason codes, carried in the second payload byte of
/// an aggregate custody signal.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CustodyReason {
    #[default]
    NoAdditionalInformation,
    RedundantReception,
    DepletedStorage,
    EndpointIdUnintelligible,
    NoRouteToDestination,
    NoTimelyContact,
    BlockUnintelligible,
    Unassigned(u8),
}

impl From<CustodyReason> for u8 {
    fn from(value: CustodyReason) -> Self {
        match value {
            CustodyReason::NoAdditionalInformation => 0,
            CustodyReason::RedundantReception => 3,
            CustodyReason::DepletedStorage => 4,
            CustodyReason::EndpointIdUnintelligible => 5,
            CustodyReason::NoRouteToDestination => 6,
            CustodyReason::NoTimelyContact => 7,
            CustodyReason::BlockUnintelligible => 8,
            CustodyReason::Unassigned(v) => v,
        }
    }
}

impl From<u8> for CustodyReason {
    fn from(value: u8) -> Self {
        match value {
            0 => CustodyReason::NoAdditionalInformation,
            3 => CustodyReason::RedundantReception,
            4 => CustodyReason::DepletedStorage,
            5 => CustodyReason::EndpointIdUnintelligible,
            6 => CustodyReason::NoRouteToDestination,
            7 => CustodyReason::NoTimelyContact,
            8 => CustodyReason::BlockUnintelligible,
            value => CustodyReason::Unassigned(value),
        }
    }
}
