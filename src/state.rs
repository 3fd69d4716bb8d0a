use crate::services::{
    events::EventBus, group_service::GroupService, storage_service::StorageService,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub objects: StorageService,
    pub groups: GroupService,
    pub events: EventBus,
}

#[cfg(test)]
impl From<&crate::services::test_support::Harness> for AppState {
    fn from(h: &crate::services::test_support::Harness) -> Self {
        Self {
            objects: h.objects.clone(),
            groups: h.groups.clone(),
            events: h.events.clone(),
        }
    }
}
