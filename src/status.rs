//! 账户状态推导
//!
//! 状态完全由 (enable, expire_time) 决定，每次状态变更操作都要重新计算并覆盖存储字段。
//! 所有时间统一为 UTC 并截断到秒，与引擎侧 `YYYY-MM-DD HH:MM:SS` 精度一致。

use chrono::{DateTime, SubsecRound, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 账户生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "expired")]
    Expired,
    #[sea_orm(string_value = "disabled")]
    Disabled,
}

/// 在数据访问边界统一时间表示
pub fn normalize(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(0)
}

/// 当前时间（已规范化）
pub fn now() -> DateTime<Utc> {
    normalize(Utc::now())
}

/// 推导账户状态：disabled 优先于 expired
pub fn derive(enable: bool, expire_time: DateTime<Utc>, now: DateTime<Utc>) -> AccountStatus {
    if !enable {
        AccountStatus::Disabled
    } else if normalize(expire_time) <= normalize(now) {
        AccountStatus::Expired
    } else {
        AccountStatus::Active
    }
}

/// 账户是否应该存在于执行引擎中，与存储的 status 字段无关
pub fn should_sync(enable: bool, expire_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    enable && normalize(expire_time) > normalize(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 15, 4, 5).unwrap()
    }

    #[test]
    fn test_derive_precedence() {
        let now = base();
        let future = now + Duration::days(1);
        let past = now - Duration::days(1);

        assert_eq!(derive(true, future, now), AccountStatus::Active);
        assert_eq!(derive(true, past, now), AccountStatus::Expired);
        assert_eq!(derive(true, now, now), AccountStatus::Expired);
        assert_eq!(derive(false, future, now), AccountStatus::Disabled);
        assert_eq!(derive(false, past, now), AccountStatus::Disabled);
        assert_eq!(derive(false, now, now), AccountStatus::Disabled);
    }

    #[test]
    fn test_should_sync_matches_enable_and_expiry() {
        let now = base();
        for enable in [true, false] {
            for offset in [-3600i64, -1, 0, 1, 3600] {
                let expire = now + Duration::seconds(offset);
                assert_eq!(should_sync(enable, expire, now), enable && offset > 0);
            }
        }
    }

    #[test]
    fn test_sub_second_expiry_compares_at_second_precision() {
        let now = base();
        let expire = now + Duration::milliseconds(400);
        assert_eq!(derive(true, expire, now), AccountStatus::Expired);
        assert!(!should_sync(true, expire, now));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&AccountStatus::Disabled).unwrap();
        assert_eq!(json, "\"disabled\"");
    }
}
