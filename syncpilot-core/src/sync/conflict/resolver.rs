use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::error::{Result, SyncError};
use crate::models::conflict::{Conflict, ConflictResolution, ConflictType};
use crate::sync::conflict::merge::{
    differential_merge, shallow_merge, structural_merge, three_way_merge, FieldMergeFn,
    StructuralMergeOptions,
};
use crate::sync::types::ConflictStrategy;

/// Resolver registered for one entity type.
///
/// Returning `Ok(None)` defers to the configured strategies.
#[async_trait]
pub trait CustomResolver: Send + Sync {
    async fn resolve(&self, conflict: &Conflict) -> Result<Option<Value>>;
}

/// Host callback consulted under [`ConflictStrategy::Manual`].
#[async_trait]
pub trait ManualPrompt: Send + Sync {
    async fn prompt(&self, conflict: &Conflict) -> Result<Value>;
}

/// Supplies the last state client and server agreed on.
#[async_trait]
pub trait BaseVersionSource: Send + Sync {
    async fn fetch(&self, entity_type: &str, entity_id: &str) -> Result<Option<Value>>;
}

/// Applies resolution strategies to detected conflicts.
///
/// Strategy precedence, highest first: a custom resolver for the entity type,
/// the entity-type override, the conflict-type override, the default.
#[derive(Clone)]
pub struct ConflictResolver {
    config: ResolverConfig,
    structural: StructuralMergeOptions,
    custom_resolvers: HashMap<String, Arc<dyn CustomResolver>>,
    manual_prompt: Option<Arc<dyn ManualPrompt>>,
    base_source: Option<Arc<dyn BaseVersionSource>>,
}

impl ConflictResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> ConflictResolverBuilder {
        ConflictResolverBuilder::default()
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Built-in strategy that applies to `conflict`, ignoring custom resolvers.
    pub fn strategy_for(&self, conflict: &Conflict) -> ConflictStrategy {
        self.config
            .entity_strategies
            .get(conflict.entity_type())
            .or_else(|| self.config.conflict_type_strategies.get(&conflict.conflict_type))
            .copied()
            .unwrap_or(self.config.default_strategy)
    }

    /// Resolves `conflict` and records the outcome on it.
    ///
    /// A conflict that is already resolved returns its stored resolution
    /// unchanged. Failed resolutions are stored too but may be retried.
    pub async fn resolve(&self, conflict: &mut Conflict) -> ConflictResolution {
        if conflict.resolved {
            if let Some(resolution) = &conflict.resolution {
                return resolution.clone();
            }
        }

        let resolution = self.attempt(conflict).await;
        if resolution.success {
            info!(
                "Resolved {} conflict {} with {}",
                conflict.conflict_type, conflict.id, resolution.strategy
            );
        } else {
            warn!(
                "Failed to resolve {} conflict {} with {}: {}",
                conflict.conflict_type,
                conflict.id,
                resolution.strategy,
                resolution.error.as_deref().unwrap_or("unknown error")
            );
        }

        conflict.resolved = resolution.success;
        conflict.resolution = Some(resolution.clone());
        resolution
    }

    async fn attempt(&self, conflict: &Conflict) -> ConflictResolution {
        if let Some(custom) = self.custom_resolvers.get(conflict.entity_type()) {
            match custom.resolve(conflict).await {
                Ok(Some(data)) => {
                    return ConflictResolution::resolved(ConflictStrategy::Custom, Some(data))
                }
                Ok(None) => debug!(
                    "Custom resolver for {} deferred conflict {}",
                    conflict.entity_type(),
                    conflict.id
                ),
                Err(e) => return ConflictResolution::failed(ConflictStrategy::Custom, e.to_string()),
            }
        }

        let strategy = self.strategy_for(conflict);
        match self.apply(strategy, conflict).await {
            Ok(data) => ConflictResolution::resolved(strategy, data),
            Err(e) => ConflictResolution::failed(strategy, e.to_string()),
        }
    }

    async fn apply(&self, strategy: ConflictStrategy, conflict: &Conflict) -> Result<Option<Value>> {
        let client = conflict.client_data();
        let server = conflict.server_data.as_ref();

        match strategy {
            ConflictStrategy::ClientWins => Ok(Some(client)),
            ConflictStrategy::ServerWins => Ok(conflict.server_data.clone()),
            ConflictStrategy::Merge => Ok(Some(self.merge(conflict, client))),
            ConflictStrategy::ThreeWayMerge => match self.fetch_base(conflict).await {
                Some(base) => Ok(Some(match server {
                    Some(server) => three_way_merge(&client, server, &base),
                    None => client,
                })),
                None => {
                    debug!("No base version for {}, falling back to merge", conflict.id);
                    Ok(Some(self.merge(conflict, client)))
                }
            },
            ConflictStrategy::StructuralMerge => Ok(Some(self.structural(client, server))),
            ConflictStrategy::Differential => match self.fetch_base(conflict).await {
                Some(base) => Ok(Some(match server {
                    Some(server) => differential_merge(&client, server, &base),
                    None => client,
                })),
                None => {
                    debug!(
                        "No base version for {}, falling back to structural merge",
                        conflict.id
                    );
                    Ok(Some(self.structural(client, server)))
                }
            },
            ConflictStrategy::Manual => match &self.manual_prompt {
                Some(prompt) => prompt.prompt(conflict).await.map(Some),
                None => Err(SyncError::Resolution(
                    "no manual resolution handler".to_string(),
                )),
            },
            ConflictStrategy::Skip => Ok(None),
            ConflictStrategy::Custom => Err(SyncError::Resolution(format!(
                "no custom resolver registered for {}",
                conflict.entity_type()
            ))),
        }
    }

    /// Shallow union for UPDATE_UPDATE; server state for everything else.
    fn merge(&self, conflict: &Conflict, client: Value) -> Value {
        match (&conflict.server_data, conflict.conflict_type) {
            (Some(server), ConflictType::UpdateUpdate) => shallow_merge(&client, server),
            (Some(server), _) => server.clone(),
            (None, _) => client,
        }
    }

    fn structural(&self, client: Value, server: Option<&Value>) -> Value {
        match server {
            Some(server) => structural_merge(&client, server, &self.structural),
            None => client,
        }
    }

    async fn fetch_base(&self, conflict: &Conflict) -> Option<Value> {
        let source = self.base_source.as_ref()?;
        let entity_id = conflict.entity_id()?;
        let entity_type = conflict.entity_type();

        let fetched = timeout(
            self.config.base_fetch_timeout,
            source.fetch(entity_type, entity_id),
        )
        .await
        .unwrap_or(Err(SyncError::Timeout));

        match fetched {
            Ok(base) => base,
            Err(e) => {
                warn!("Base version fetch for {}:{} failed: {}", entity_type, entity_id, e);
                None
            }
        }
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut custom: Vec<&String> = self.custom_resolvers.keys().collect();
        custom.sort();
        f.debug_struct("ConflictResolver")
            .field("config", &self.config)
            .field("structural", &self.structural)
            .field("custom_resolvers", &custom)
            .field("manual_prompt", &self.manual_prompt.is_some())
            .field("base_source", &self.base_source.is_some())
            .finish()
    }
}

#[derive(Default)]
pub struct ConflictResolverBuilder {
    config: ResolverConfig,
    field_mergers: Vec<(String, FieldMergeFn)>,
    custom_resolvers: HashMap<String, Arc<dyn CustomResolver>>,
    manual_prompt: Option<Arc<dyn ManualPrompt>>,
    base_source: Option<Arc<dyn BaseVersionSource>>,
}

impl ConflictResolverBuilder {
    pub fn config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn default_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.config.default_strategy = strategy;
        self
    }

    pub fn entity_strategy(mut self, entity_type: impl Into<String>, strategy: ConflictStrategy) -> Self {
        self.config.entity_strategies.insert(entity_type.into(), strategy);
        self
    }

    pub fn conflict_type_strategy(mut self, conflict_type: ConflictType, strategy: ConflictStrategy) -> Self {
        self.config.conflict_type_strategies.insert(conflict_type, strategy);
        self
    }

    pub fn field_merger<F>(mut self, path: impl Into<String>, merge: F) -> Self
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        self.field_mergers.push((path.into(), Arc::new(merge)));
        self
    }

    pub fn custom_resolver(mut self, entity_type: impl Into<String>, resolver: Arc<dyn CustomResolver>) -> Self {
        self.custom_resolvers.insert(entity_type.into(), resolver);
        self
    }

    pub fn manual_prompt(mut self, prompt: Arc<dyn ManualPrompt>) -> Self {
        self.manual_prompt = Some(prompt);
        self
    }

    pub fn base_source(mut self, source: Arc<dyn BaseVersionSource>) -> Self {
        self.base_source = Some(source);
        self
    }

    pub fn build(self) -> ConflictResolver {
        let mut structural = StructuralMergeOptions::new(self.config.array_strategy);
        for (path, merge) in self.field_mergers {
            structural.set_field_merger(path, merge);
        }

        ConflictResolver {
            config: self.config,
            structural,
            custom_resolvers: self.custom_resolvers,
            manual_prompt: self.manual_prompt,
            base_source: self.base_source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::operation::{OperationKind, QueuedOperation};
    use crate::sync::types::{ArrayMergeStrategy, SyncOperation};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn conflict(conflict_type: ConflictType, client: Value, server: Option<Value>) -> Conflict {
        let params = client.as_object().cloned().unwrap_or_default();
        let op = SyncOperation::new(QueuedOperation::new(
            OperationKind::Update,
            "updateTask",
            params,
            "task",
            Some("t1".to_string()),
        ));
        Conflict::new(conflict_type, op, server, None)
    }

    fn update_update() -> Conflict {
        conflict(
            ConflictType::UpdateUpdate,
            json!({"title": "A", "count": 5}),
            Some(json!({"title": "B", "count": 5})),
        )
    }

    struct FixedBase(Option<Value>);

    #[async_trait]
    impl BaseVersionSource for FixedBase {
        async fn fetch(&self, _entity_type: &str, _entity_id: &str) -> Result<Option<Value>> {
            Ok(self.0.clone())
        }
    }

    struct SlowBase;

    #[async_trait]
    impl BaseVersionSource for SlowBase {
        async fn fetch(&self, _entity_type: &str, _entity_id: &str) -> Result<Option<Value>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some(json!({})))
        }
    }

    struct Prompt(Value);

    #[async_trait]
    impl ManualPrompt for Prompt {
        async fn prompt(&self, _conflict: &Conflict) -> Result<Value> {
            Ok(self.0.clone())
        }
    }

    struct Custom(Option<Value>);

    #[async_trait]
    impl CustomResolver for Custom {
        async fn resolve(&self, _conflict: &Conflict) -> Result<Option<Value>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_merge_server_wins_on_differing_field() {
        let resolver = ConflictResolver::builder()
            .default_strategy(ConflictStrategy::Merge)
            .build();
        let mut c = update_update();
        let resolution = resolver.resolve(&mut c).await;

        assert!(resolution.success);
        assert_eq!(resolution.data, Some(json!({"title": "B", "count": 5})));
        assert!(c.resolved);
    }

    #[tokio::test]
    async fn test_merge_on_other_types_takes_server_state() {
        let resolver = ConflictResolver::builder()
            .default_strategy(ConflictStrategy::Merge)
            .build();
        let mut c = conflict(
            ConflictType::Generic,
            json!({"title": "A", "extra": 1}),
            Some(json!({"title": "B"})),
        );
        assert_eq!(resolver.resolve(&mut c).await.data, Some(json!({"title": "B"})));
    }

    #[tokio::test]
    async fn test_client_and_server_wins() {
        let client = ConflictResolver::builder()
            .default_strategy(ConflictStrategy::ClientWins)
            .build();
        let server = ConflictResolver::default();

        assert_eq!(
            client.resolve(&mut update_update()).await.data,
            Some(json!({"title": "A", "count": 5}))
        );
        assert_eq!(
            server.resolve(&mut update_update()).await.data,
            Some(json!({"title": "B", "count": 5}))
        );
    }

    #[tokio::test]
    async fn test_strategy_precedence() {
        let resolver = ConflictResolver::builder()
            .default_strategy(ConflictStrategy::ServerWins)
            .conflict_type_strategy(ConflictType::UpdateUpdate, ConflictStrategy::ClientWins)
            .entity_strategy("task", ConflictStrategy::Skip)
            .build();
        assert_eq!(resolver.strategy_for(&update_update()), ConflictStrategy::Skip);

        let by_type = ConflictResolver::builder()
            .conflict_type_strategy(ConflictType::UpdateUpdate, ConflictStrategy::ClientWins)
            .entity_strategy("note", ConflictStrategy::Skip)
            .build();
        assert_eq!(by_type.strategy_for(&update_update()), ConflictStrategy::ClientWins);

        let with_custom = ConflictResolver::builder()
            .entity_strategy("task", ConflictStrategy::Skip)
            .custom_resolver("task", Arc::new(Custom(Some(json!({"title": "C"})))))
            .build();
        let resolution = with_custom.resolve(&mut update_update()).await;
        assert_eq!(resolution.strategy, ConflictStrategy::Custom);
        assert_eq!(resolution.data, Some(json!({"title": "C"})));
    }

    #[tokio::test]
    async fn test_custom_resolver_can_defer() {
        let resolver = ConflictResolver::builder()
            .custom_resolver("task", Arc::new(Custom(None)))
            .default_strategy(ConflictStrategy::ClientWins)
            .build();
        let resolution = resolver.resolve(&mut update_update()).await;
        assert_eq!(resolution.strategy, ConflictStrategy::ClientWins);
    }

    #[tokio::test]
    async fn test_three_way_merge_with_base() {
        let resolver = ConflictResolver::builder()
            .default_strategy(ConflictStrategy::ThreeWayMerge)
            .base_source(Arc::new(FixedBase(Some(json!({"title": "A", "count": 1})))))
            .build();
        // Client changed count only; server changed title only.
        let mut c = conflict(
            ConflictType::UpdateUpdate,
            json!({"title": "A", "count": 2}),
            Some(json!({"title": "B", "count": 1})),
        );
        assert_eq!(
            resolver.resolve(&mut c).await.data,
            Some(json!({"title": "B", "count": 2}))
        );
    }

    #[tokio::test]
    async fn test_three_way_without_base_falls_back_to_merge() {
        let resolver = ConflictResolver::builder()
            .default_strategy(ConflictStrategy::ThreeWayMerge)
            .base_source(Arc::new(FixedBase(None)))
            .build();
        let resolution = resolver.resolve(&mut update_update()).await;
        assert!(resolution.success);
        assert_eq!(resolution.strategy, ConflictStrategy::ThreeWayMerge);
        assert_eq!(resolution.data, Some(json!({"title": "B", "count": 5})));
    }

    #[tokio::test]
    async fn test_slow_base_fetch_degrades() {
        let mut config = ResolverConfig::default();
        config.default_strategy = ConflictStrategy::Differential;
        config.base_fetch_timeout = Duration::from_millis(20);
        let resolver = ConflictResolver::builder()
            .config(config)
            .base_source(Arc::new(SlowBase))
            .build();
        let mut c = conflict(
            ConflictType::UpdateUpdate,
            json!({"tags": ["a"], "title": "A"}),
            Some(json!({"tags": ["b"], "title": "B"})),
        );

        let resolution = resolver.resolve(&mut c).await;
        assert!(resolution.success);
        // Structural fallback with positional array merge.
        assert_eq!(resolution.data, Some(json!({"tags": ["b"], "title": "B"})));
    }

    #[tokio::test]
    async fn test_structural_merge_uses_array_mode_and_field_mergers() {
        let mut config = ResolverConfig::default();
        config.default_strategy = ConflictStrategy::StructuralMerge;
        config.array_strategy = ArrayMergeStrategy::Append;
        let resolver = ConflictResolver::builder()
            .config(config)
            .field_merger("count", |c, s| {
                json!(c.as_i64().unwrap_or(0).max(s.as_i64().unwrap_or(0)))
            })
            .build();
        let mut c = conflict(
            ConflictType::UpdateUpdate,
            json!({"tags": ["a", "b"], "count": 9}),
            Some(json!({"tags": ["b", "c"], "count": 4})),
        );
        assert_eq!(
            resolver.resolve(&mut c).await.data,
            Some(json!({"tags": ["a", "b", "c"], "count": 9}))
        );
    }

    #[tokio::test]
    async fn test_manual_requires_prompt() {
        let resolver = ConflictResolver::builder()
            .default_strategy(ConflictStrategy::Manual)
            .build();
        let mut c = update_update();
        let resolution = resolver.resolve(&mut c).await;

        assert!(!resolution.success);
        assert_eq!(
            resolution.error.as_deref(),
            Some("conflict resolution failed: no manual resolution handler")
        );
        assert!(!c.resolved);
        assert_eq!(c.resolution, Some(resolution));
    }

    #[tokio::test]
    async fn test_manual_prompt_supplies_value() {
        let resolver = ConflictResolver::builder()
            .default_strategy(ConflictStrategy::Manual)
            .manual_prompt(Arc::new(Prompt(json!({"title": "picked"}))))
            .build();
        let resolution = resolver.resolve(&mut update_update()).await;
        assert_eq!(resolution.data, Some(json!({"title": "picked"})));
    }

    #[tokio::test]
    async fn test_skip_succeeds_without_data() {
        let resolver = ConflictResolver::builder()
            .default_strategy(ConflictStrategy::Skip)
            .build();
        let resolution = resolver.resolve(&mut update_update()).await;
        assert!(resolution.success);
        assert_eq!(resolution.data, None);
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let resolver = ConflictResolver::builder()
            .default_strategy(ConflictStrategy::Merge)
            .build();
        let mut c = update_update();
        let first = resolver.resolve(&mut c).await;

        // A different resolver must not change a settled conflict.
        let other = ConflictResolver::builder()
            .default_strategy(ConflictStrategy::ClientWins)
            .build();
        let second = other.resolve(&mut c).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_failed_resolution_can_be_retried() {
        let mut c = update_update();
        let failing = ConflictResolver::builder()
            .default_strategy(ConflictStrategy::Manual)
            .build();
        assert!(!failing.resolve(&mut c).await.success);

        let resolution = ConflictResolver::default().resolve(&mut c).await;
        assert!(resolution.success);
        assert!(c.resolved);
    }
}
