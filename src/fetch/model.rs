use serde::{Deserialize, Deserializer};

use super::FetchError;

/// Remark the upstream puts on the cold water entry.
pub const COLD_WATER_REMARK: &str = "冷水";

// Upstream sends `null` for empty lists and objects.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZhfdResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: ZhfdData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZhfdData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub records: Vec<RentInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    pub meter_add_forms: Vec<MeterForm>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub water_add_forms: Vec<WaterForm>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterForm {
    #[serde(default, deserialize_with = "null_as_default")]
    pub residual_electricity: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterForm {
    #[serde(default, deserialize_with = "null_as_default")]
    pub remarks: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recharge_tonnage: String,
}

/// Balances extracted from one valid upstream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtilityReading {
    pub electricity: String,
    pub cold_water: String,
    pub hot_water: String,
}

impl UtilityReading {
    /// Validates a record holding exactly one meter and two water entries.
    ///
    /// The water entry remarked `冷水` becomes cold water whatever its
    /// position; when the first entry is not remarked that way the second one
    /// is taken as cold.
    pub fn from_record(record: &RentInfo) -> Option<Self> {
        let [meter] = record.meter_add_forms.as_slice() else {
            return None;
        };
        let [first, second] = record.water_add_forms.as_slice() else {
            return None;
        };

        let (cold, hot) = if first.remarks == COLD_WATER_REMARK {
            (first, second)
        } else {
            (second, first)
        };

        Some(Self {
            electricity: meter.residual_electricity.clone(),
            cold_water: cold.recharge_tonnage.clone(),
            hot_water: hot.recharge_tonnage.clone(),
        })
    }
}

/// Parses and validates an upstream body. Errors carry the raw body where it
/// helps diagnose a contract change.
pub fn parse_reading(body: &str) -> Result<UtilityReading, FetchError> {
    let response: ZhfdResponse = serde_json::from_str(body).map_err(|source| FetchError::Malformed {
        source,
        body: body.to_string(),
    })?;

    if !response.success {
        return Err(FetchError::Business {
            message: response.message,
        });
    }

    let record = response.data.records.first().ok_or_else(|| FetchError::NoData {
        body: body.to_string(),
    })?;

    UtilityReading::from_record(record).ok_or_else(|| FetchError::DataShape {
        body: body.to_string(),
    })
}
