//! 出口管理和网卡扫描

use std::sync::Arc;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::engine::{EngineOutbound, EngineResult};
use crate::entity::{account, egress_target, Account, EgressTarget};
use crate::error::{PanelError, PanelResult};
use crate::reconciler::Reconciler;
use crate::status;

const KIND: &str = "出口";

fn default_max_users() -> i32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEgressRequest {
    pub name: String,
    pub protocol: Option<String>,
    /// 形如 {"eh": "...", "proxyUrl": "..."}
    pub config: Option<Value>,
    pub local_ip: Option<String>,
    pub remark: Option<String>,
    #[serde(default = "default_max_users")]
    pub max_users: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEgressRequest {
    pub name: Option<String>,
    pub protocol: Option<String>,
    pub config: Option<Value>,
    pub local_ip: Option<String>,
    pub remark: Option<String>,
    pub max_users: Option<i32>,
}

struct NewEgress {
    name: String,
    protocol: String,
    config: Value,
    local_ip: Option<String>,
    remark: Option<String>,
    auto_generated: bool,
    max_users: i32,
}

fn outbound_of(model: &egress_target::Model) -> EngineOutbound {
    EngineOutbound {
        name: model.name.clone(),
        eh: model.interface_ip(),
        proxy_url: model.proxy_url(),
    }
}

fn validate_max_users(max_users: i32) -> PanelResult<()> {
    if max_users < 1 {
        return Err(PanelError::InvalidRequest("max_users 至少为 1".to_string()));
    }
    Ok(())
}

pub struct EgressService {
    db: DatabaseConnection,
    reconciler: Arc<Reconciler>,
}

impl EgressService {
    pub fn new(db: DatabaseConnection, reconciler: Arc<Reconciler>) -> Self {
        Self { db, reconciler }
    }

    pub async fn list(&self) -> PanelResult<Vec<egress_target::Model>> {
        Ok(EgressTarget::find()
            .order_by_asc(egress_target::Column::Id)
            .all(&self.db)
            .await?)
    }

    pub async fn get(&self, id: i64) -> PanelResult<egress_target::Model> {
        EgressTarget::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| PanelError::EgressNotFound(format!("#{}", id)))
    }

    async fn find_by_name(&self, name: &str) -> PanelResult<Option<egress_target::Model>> {
        Ok(EgressTarget::find()
            .filter(egress_target::Column::Name.eq(name))
            .one(&self.db)
            .await?)
    }

    async fn insert(&self, new: NewEgress) -> PanelResult<egress_target::Model> {
        if self.find_by_name(&new.name).await?.is_some() {
            return Err(PanelError::DuplicateName {
                kind: KIND,
                name: new.name,
            });
        }

        let now = status::now();
        let model = egress_target::ActiveModel {
            name: Set(new.name),
            protocol: Set(new.protocol),
            config: Set(new.config),
            local_ip: Set(new.local_ip),
            remark: Set(new.remark),
            auto_generated: Set(new.auto_generated),
            max_users: Set(new.max_users),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        if let Err(e) = self.reconciler.engine().create_outbound(&outbound_of(&model)).await {
            warn!("出口 {} 同步到引擎失败: {}", model.name, e);
        }
        Ok(model)
    }

    pub async fn create(&self, req: CreateEgressRequest) -> PanelResult<egress_target::Model> {
        let name = req.name.trim().to_string();
        if name.is_empty() {
            return Err(PanelError::InvalidRequest("出口名称不能为空".to_string()));
        }
        validate_max_users(req.max_users)?;

        let config = req.config.unwrap_or_else(|| {
            json!({
                "eh": req.local_ip.clone().unwrap_or_default(),
                "proxyUrl": "",
            })
        });

        let model = self
            .insert(NewEgress {
                name,
                protocol: req.protocol.unwrap_or_else(|| "direct".to_string()),
                config,
                local_ip: req.local_ip,
                remark: req.remark,
                auto_generated: false,
                max_users: req.max_users,
            })
            .await?;

        info!("✅ 创建出口 {}", model.name);
        Ok(model)
    }

    /// 修改出口；名称或地址变化时重新同步引用它的账户
    pub async fn update(&self, id: i64, req: UpdateEgressRequest) -> PanelResult<egress_target::Model> {
        let existing = self.get(id).await?;
        if let Some(max_users) = req.max_users {
            validate_max_users(max_users)?;
        }
        if let Some(name) = &req.name {
            if name.trim().is_empty() {
                return Err(PanelError::InvalidRequest("出口名称不能为空".to_string()));
            }
            let name = name.trim();
            if name != existing.name {
                if let Some(other) = self.find_by_name(name).await? {
                    if other.id != id {
                        return Err(PanelError::DuplicateName {
                            kind: KIND,
                            name: name.to_string(),
                        });
                    }
                }
            }
        }

        let old_name = existing.name.clone();
        let old_outbound = outbound_of(&existing);

        let mut active: egress_target::ActiveModel = existing.into();
        if let Some(name) = req.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(protocol) = req.protocol {
            active.protocol = Set(protocol);
        }
        if let Some(config) = req.config {
            active.config = Set(config);
        }
        if req.local_ip.is_some() {
            active.local_ip = Set(req.local_ip);
        }
        if req.remark.is_some() {
            active.remark = Set(req.remark);
        }
        if let Some(max_users) = req.max_users {
            active.max_users = Set(max_users);
        }
        active.updated_at = Set(status::now());
        let model = active.update(&self.db).await?;

        let outbound = outbound_of(&model);
        if outbound != old_outbound {
            self.sync_outbound(&old_name, &outbound).await;
        }
        if model.name != old_name {
            self.resync_accounts(model.id).await?;
        }

        Ok(model)
    }

    async fn sync_outbound(&self, old_name: &str, outbound: &EngineOutbound) {
        if let Err(e) = self.upsert_outbound(old_name, outbound).await {
            warn!("出口 {} 同步到引擎失败: {}", outbound.name, e);
        }
    }

    /// 改名时先删除旧名称，再按名称探测后编辑或创建
    async fn upsert_outbound(&self, old_name: &str, outbound: &EngineOutbound) -> EngineResult<()> {
        let engine = self.reconciler.engine();
        if old_name != outbound.name {
            match engine.delete_outbound(old_name).await {
                Err(e) if !e.is_not_found() => return Err(e),
                _ => {}
            }
        }

        let existing = engine.list_outbounds().await?;
        if existing.iter().any(|o| o.name == outbound.name) {
            engine.edit_outbound(outbound).await
        } else {
            engine.create_outbound(outbound).await
        }
    }

    async fn resync_accounts(&self, egress_id: i64) -> PanelResult<()> {
        let accounts = Account::find()
            .filter(account::Column::EgressId.eq(egress_id))
            .all(&self.db)
            .await?;
        for model in accounts {
            self.reconciler.apply(model.id).await;
        }
        Ok(())
    }

    /// 删除出口，仍被账户引用时拒绝
    pub async fn delete(&self, id: i64) -> PanelResult<()> {
        let existing = self.get(id).await?;

        let count = Account::find()
            .filter(account::Column::EgressId.eq(id))
            .count(&self.db)
            .await?;
        if count > 0 {
            return Err(PanelError::EgressInUse {
                name: existing.name,
                count,
            });
        }

        EgressTarget::delete_by_id(id).exec(&self.db).await?;

        match self.reconciler.engine().delete_outbound(&existing.name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!("引擎中不存在出口 {}", existing.name),
            Err(e) => warn!("从引擎删除出口 {} 失败: {}", existing.name, e),
        }

        info!("🗑️ 删除出口 {}", existing.name);
        Ok(())
    }

    /// 扫描引擎所在机器的网卡并为每个新地址创建直出出口
    pub async fn scan_interfaces(&self) -> PanelResult<Vec<egress_target::Model>> {
        let interfaces = self.reconciler.engine().list_interfaces().await?;

        let mut created = Vec::new();
        for iface in interfaces {
            if iface.eh.is_empty() {
                continue;
            }

            let name = format!("direct_{}_{}", iface.eh_name, iface.eh.replace('.', "_"));
            if self.find_by_name(&name).await?.is_some() {
                continue;
            }

            let model = self
                .insert(NewEgress {
                    name,
                    protocol: "direct".to_string(),
                    config: json!({
                        "eh": iface.eh,
                        "proxyUrl": "",
                        "publicIp": iface.ip,
                        "interfaceName": iface.eh_name,
                    }),
                    local_ip: Some(iface.eh.clone()),
                    remark: Some(format!("自动扫描: {} ({})", iface.eh_name, iface.ip)),
                    auto_generated: true,
                    max_users: default_max_users(),
                })
                .await?;
            created.push(model);
        }

        info!("🔍 网卡扫描完成，新增出口 {} 个", created.len());
        Ok(created)
    }
}
