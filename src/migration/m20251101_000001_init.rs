use sea_orm_migration::prelude::*;
use sea_orm_migration::schema::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 出口表（一个出口对应一个机器 IP）
        manager
            .create_table(
                Table::create()
                    .table(EgressTarget::Table)
                    .if_not_exists()
                    .col(big_integer(EgressTarget::Id).auto_increment().primary_key())
                    .col(string_uniq(EgressTarget::Name))
                    .col(string(EgressTarget::Protocol).default("direct"))
                    .col(json(EgressTarget::Config))
                    .col(string_null(EgressTarget::LocalIp))
                    .col(text_null(EgressTarget::Remark))
                    .col(boolean(EgressTarget::AutoGenerated).default(false))
                    .col(integer(EgressTarget::MaxUsers).default(10))
                    .col(timestamp_with_time_zone(EgressTarget::CreatedAt))
                    .col(timestamp_with_time_zone(EgressTarget::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        // 规则组表
        manager
            .create_table(
                Table::create()
                    .table(RuleGroup::Table)
                    .if_not_exists()
                    .col(big_integer(RuleGroup::Id).auto_increment().primary_key())
                    .col(string_uniq(RuleGroup::Name))
                    .col(text(RuleGroup::Content))
                    .col(integer(RuleGroup::Priority).default(0))
                    .col(text_null(RuleGroup::Remark))
                    .col(timestamp_with_time_zone(RuleGroup::CreatedAt))
                    .col(timestamp_with_time_zone(RuleGroup::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        // 账户表
        manager
            .create_table(
                Table::create()
                    .table(Account::Table)
                    .if_not_exists()
                    .col(big_integer(Account::Id).auto_increment().primary_key())
                    .col(string(Account::Username))
                    .col(string(Account::Password))
                    .col(integer_uniq(Account::Port))
                    .col(string(Account::Protocol).default("socks5"))
                    .col(big_integer(Account::TotalTraffic).default(0))
                    .col(big_integer(Account::UpTraffic).default(0))
                    .col(big_integer(Account::DownTraffic).default(0))
                    .col(timestamp_with_time_zone(Account::ExpireTime))
                    .col(timestamp_with_time_zone_null(Account::LastSeen))
                    .col(boolean(Account::Enable).default(true))
                    .col(string(Account::Status).default("active"))
                    .col(integer(Account::SendLimit).default(0))
                    .col(integer(Account::ReceiveLimit).default(0))
                    .col(integer(Account::MaxConnCount).default(0))
                    .col(big_integer(Account::EgressId))
                    .col(text_null(Account::Remark))
                    .col(string_null(Account::Email))
                    .col(timestamp_with_time_zone(Account::CreatedAt))
                    .col(timestamp_with_time_zone(Account::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_account_egress_target")
                            .from(Account::Table, Account::EgressId)
                            .to(EgressTarget::Table, EgressTarget::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_account_egress_id")
                    .table(Account::Table)
                    .col(Account::EgressId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_account_status_expire")
                    .table(Account::Table)
                    .col(Account::Status)
                    .col(Account::ExpireTime)
                    .to_owned(),
            )
            .await?;

        // 账户与规则组的多对多关联
        manager
            .create_table(
                Table::create()
                    .table(AccountRule::Table)
                    .if_not_exists()
                    .col(big_integer(AccountRule::Id).auto_increment().primary_key())
                    .col(big_integer(AccountRule::AccountId))
                    .col(big_integer(AccountRule::RuleId))
                    .col(timestamp_with_time_zone(AccountRule::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_account_rule_account")
                            .from(AccountRule::Table, AccountRule::AccountId)
                            .to(Account::Table, Account::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_account_rule_rule")
                            .from(AccountRule::Table, AccountRule::RuleId)
                            .to(RuleGroup::Table, RuleGroup::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_account_rule_unique")
                    .table(AccountRule::Table)
                    .col(AccountRule::AccountId)
                    .col(AccountRule::RuleId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_account_rule_rule_id")
                    .table(AccountRule::Table)
                    .col(AccountRule::RuleId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AccountRule::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Account::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(RuleGroup::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(EgressTarget::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum EgressTarget {
    Table,
    Id,
    Name,
    Protocol,
    Config,
    LocalIp,
    Remark,
    AutoGenerated,
    MaxUsers,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum RuleGroup {
    Table,
    Id,
    Name,
    Content,
    Priority,
    Remark,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Account {
    Table,
    Id,
    Username,
    Password,
    Port,
    Protocol,
    TotalTraffic,
    UpTraffic,
    DownTraffic,
    ExpireTime,
    LastSeen,
    Enable,
    Status,
    SendLimit,
    ReceiveLimit,
    MaxConnCount,
    EgressId,
    Remark,
    Email,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum AccountRule {
    Table,
    Id,
    AccountId,
    RuleId,
    CreatedAt,
}
