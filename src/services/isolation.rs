//! 公司数据隔离：把主体转换成查询范围
//!
//! Every list/read of company-owned rows goes through [`scope_query`], so a
//! company user can never see rows outside the companies they hold `view` in.

use sqlx::{Postgres, QueryBuilder};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::{
    auth::Principal,
    models::permission::{ActionKey, Grant, PageKey},
    repository::CompanyScope,
};

/// Unscoped request for company-owned data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataQuery {
    pub page: PageKey,
    /// Narrow to one company; `None` means every company the caller may see
    pub company_id: Option<Uuid>,
}

impl DataQuery {
    pub fn new(page: PageKey, company_id: Option<Uuid>) -> Self {
        Self { page, company_id }
    }
}

/// Query restricted to what the principal may read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedQuery {
    pub page: PageKey,
    pub companies: CompanyScope,
    /// Set for device principals: rows carrying a device id must match it
    pub device_id: Option<Uuid>,
}

pub fn scope_query(principal: &Principal, base: DataQuery) -> ScopedQuery {
    let requested = |ids: BTreeSet<Uuid>| match base.company_id {
        Some(company_id) => CompanyScope::Only(ids.into_iter().filter(|id| *id == company_id).collect()),
        None => CompanyScope::Only(ids),
    };

    match principal {
        Principal::SuperUser { .. } => ScopedQuery {
            page: base.page,
            companies: base.company_id.map(CompanyScope::single).unwrap_or_default(),
            device_id: None,
        },
        Principal::CompanyUser { bindings, .. } => {
            let view = Grant::new(base.page, ActionKey::View);
            let visible = bindings
                .iter()
                .filter(|b| b.is_active() && b.effective_grants().contains(&view))
                .filter_map(|b| b.company_id)
                .collect();

            ScopedQuery {
                page: base.page,
                companies: requested(visible),
                device_id: None,
            }
        }
        Principal::Device { device_id, company_id } => ScopedQuery {
            page: base.page,
            companies: requested(BTreeSet::from([*company_id])),
            device_id: Some(*device_id),
        },
    }
}

impl ScopedQuery {
    /// Matches nothing at all
    pub fn is_empty(&self) -> bool {
        self.companies.is_empty()
    }

    /// In-memory check for a row owned by `company_id` (and optionally tied to a device)
    pub fn permits(&self, company_id: Uuid, device_id: Option<Uuid>) -> bool {
        let device_ok = match (self.device_id, device_id) {
            (Some(own), Some(row)) => own == row,
            _ => true,
        };
        device_ok && self.companies.contains(company_id)
    }

    /// Appends the scope to a `WHERE` clause; an empty scope appends `AND FALSE`
    pub fn push_sql_filter(
        &self,
        builder: &mut QueryBuilder<'_, Postgres>,
        company_column: &str,
        device_column: Option<&str>,
    ) {
        self.companies.push_sql(builder, company_column);

        if let (Some(column), Some(device_id)) = (device_column, self.device_id) {
            builder.push(format!(" AND {} = ", column));
            builder.push_bind(device_id);
        }
    }
}
