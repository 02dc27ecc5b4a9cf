//! Event registry: the immutable tag → definition table.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use partywire_core::schema::{Field, Schema, SerdeSchema, SharedValidator, Validator};
use partywire_core::Envelope;
use serde::de::DeserializeOwned;

use crate::connection::Connection;
use crate::errors::RegistryError;
use crate::room::Room;

/// Handler for one event type.
///
/// The router awaits each handler before reading the next message from the
/// same connection. Handlers on different connections of the same room run
/// concurrently and share `ctx`; a read-modify-write of shared state across
/// an `.await` needs its own lock, or enable room dispatch serialization.
#[async_trait]
pub trait EventHandler<C>: Send + Sync {
    /// Handle a validated message.
    async fn handle(
        &self,
        message: Envelope,
        connection: &Arc<Connection>,
        room: &Arc<Room>,
        ctx: &Arc<C>,
    ) -> anyhow::Result<()>;
}

/// Adapter running an async closure as an [`EventHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<C, F, Fut> EventHandler<C> for FnHandler<F>
where
    C: Send + Sync + 'static,
    F: Fn(Envelope, Arc<Connection>, Arc<Room>, Arc<C>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(
        &self,
        message: Envelope,
        connection: &Arc<Connection>,
        room: &Arc<Room>,
        ctx: &Arc<C>,
    ) -> anyhow::Result<()> {
        (self.0)(message, Arc::clone(connection), Arc::clone(room), Arc::clone(ctx)).await
    }
}

/// Adapter that deserializes the envelope into `T` first.
struct TypedHandler<T, F> {
    f: F,
    _marker: PhantomData<fn() -> T>,
}

#[async_trait]
impl<C, T, F, Fut> EventHandler<C> for TypedHandler<T, F>
where
    C: Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    F: Fn(T, Arc<Connection>, Arc<Room>, Arc<C>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(
        &self,
        message: Envelope,
        connection: &Arc<Connection>,
        room: &Arc<Room>,
        ctx: &Arc<C>,
    ) -> anyhow::Result<()> {
        let typed: T = message.parse()?;
        (self.f)(typed, Arc::clone(connection), Arc::clone(room), Arc::clone(ctx)).await
    }
}

/// One registered event.
pub struct EventDefinition<C> {
    tag: String,
    schema: SharedValidator,
    handler: Arc<dyn EventHandler<C>>,
}

impl<C: Send + Sync + 'static> EventDefinition<C> {
    /// Discriminant tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Schema for the whole envelope.
    pub fn schema(&self) -> &dyn Validator {
        self.schema.as_ref()
    }

    /// Handler.
    pub fn handler(&self) -> &Arc<dyn EventHandler<C>> {
        &self.handler
    }
}

/// Immutable event table built once at startup.
pub struct EventRegistry<C> {
    events: HashMap<String, EventDefinition<C>>,
    tags: Vec<String>,
    discriminant: Schema,
}

impl<C: Send + Sync + 'static> EventRegistry<C> {
    /// Start building a registry.
    pub fn builder() -> EventRegistryBuilder<C> {
        EventRegistryBuilder { events: Vec::new() }
    }

    /// Look up a definition by tag.
    pub fn get(&self, tag: &str) -> Option<&EventDefinition<C>> {
        self.events.get(tag)
    }

    /// Whether `tag` is registered.
    pub fn contains(&self, tag: &str) -> bool {
        self.events.contains_key(tag)
    }

    /// Tags in registration order.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// `{ type: enum(tags) }`, derived from [`tags`](Self::tags).
    pub fn discriminant(&self) -> &Schema {
        &self.discriminant
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Whether no events are registered.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Collects event definitions; [`build`](Self::build) checks them.
pub struct EventRegistryBuilder<C> {
    events: Vec<EventDefinition<C>>,
}

impl<C: Send + Sync + 'static> EventRegistryBuilder<C> {
    /// Register an event handled by an async closure.
    ///
    /// `schema` validates the whole envelope, `type` field included.
    #[must_use]
    pub fn event<V, F, Fut>(self, tag: impl Into<String>, schema: V, handler: F) -> Self
    where
        V: Validator + 'static,
        F: Fn(Envelope, Arc<Connection>, Arc<Room>, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handler(tag, schema, FnHandler(handler))
    }

    /// Register an event whose payload type doubles as its schema.
    #[must_use]
    pub fn typed<T, F, Fut>(self, tag: impl Into<String>, handler: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T, Arc<Connection>, Arc<Room>, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handler(
            tag,
            SerdeSchema::<T>::new(),
            TypedHandler {
                f: handler,
                _marker: PhantomData,
            },
        )
    }

    /// Register an event with an [`EventHandler`] implementation.
    #[must_use]
    pub fn handler<V, H>(mut self, tag: impl Into<String>, schema: V, handler: H) -> Self
    where
        V: Validator + 'static,
        H: EventHandler<C> + 'static,
    {
        self.events.push(EventDefinition {
            tag: tag.into(),
            schema: Arc::new(schema),
            handler: Arc::new(handler),
        });
        self
    }

    /// Validate tags and freeze the table.
    pub fn build(self) -> Result<EventRegistry<C>, RegistryError> {
        let mut events = HashMap::with_capacity(self.events.len());
        let mut tags = Vec::with_capacity(self.events.len());
        for def in self.events {
            if def.tag.is_empty() {
                return Err(RegistryError::EmptyTag);
            }
            if events.contains_key(&def.tag) {
                return Err(RegistryError::DuplicateTag(def.tag));
            }
            tags.push(def.tag.clone());
            let _ = events.insert(def.tag.clone(), def);
        }
        // Built directly so an empty registry rejects every message instead
        // of failing to build.
        let discriminant = Schema::object([Field::required(
            "type",
            Schema::Enumeration(tags.clone()),
        )]);
        Ok(EventRegistry {
            events,
            tags,
            discriminant,
        })
    }
}
