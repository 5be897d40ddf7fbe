//! One proxy per distributed object, created once and replayed on reconnect.

use std::any::type_name;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use hazelcast_core::protocol::client_codecs::{
    client_create_proxies, client_create_proxy, client_destroy_proxy,
    client_get_distributed_objects,
};
use hazelcast_core::{DistributedObjectInfo, HazelcastError, Result};

use super::DistributedObject;
use crate::connection::Connection;
use crate::invocation::{ClusterMessaging, InvocationTarget};

#[derive(Clone)]
struct ProxyEntry {
    object: Arc<dyn DistributedObject>,
    type_name: &'static str,
    // Set by whoever disposes an object created after the factory shut down.
    orphan_claimed: Arc<AtomicBool>,
}

type Creation = Shared<BoxFuture<'static, Result<ProxyEntry>>>;

enum Slot {
    Creating(Creation),
    Ready(ProxyEntry),
}

/// Owns the proxies of the client, keyed by service and object name.
///
/// Creation of a key runs at most once at a time; concurrent requesters
/// share the outcome. The map lock is never held across an await.
pub struct DistributedObjectFactory {
    messaging: Arc<dyn ClusterMessaging>,
    objects: Mutex<HashMap<DistributedObjectInfo, Slot>>,
    must_replay: tokio::sync::Mutex<bool>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for DistributedObjectFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedObjectFactory")
            .field("objects", &self.objects.lock().len())
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

async fn dispose_quietly(object: &Arc<dyn DistributedObject>) {
    if let Err(e) = object.dispose().await {
        warn!(
            service = object.service_name(),
            name = object.name(),
            error = %e,
            "failed to dispose distributed object"
        );
    }
}

impl DistributedObjectFactory {
    /// Creates a factory issuing its cluster requests through `messaging`.
    pub fn new(messaging: Arc<dyn ClusterMessaging>) -> Self {
        Self {
            messaging,
            objects: Mutex::new(HashMap::new()),
            must_replay: tokio::sync::Mutex::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    fn ensure_not_disposed(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(HazelcastError::Disposed("distributed object factory"));
        }
        Ok(())
    }

    /// Returns true if a ready proxy exists for `info`.
    pub fn contains(&self, info: &DistributedObjectInfo) -> bool {
        matches!(self.objects.lock().get(info), Some(Slot::Ready(_)))
    }

    /// Returns the keys of every ready proxy.
    pub fn known_objects(&self) -> Vec<DistributedObjectInfo> {
        self.objects
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(info, _)| info.clone())
            .collect()
    }

    /// Returns the proxy for `service_name`/`name`, creating it if needed.
    ///
    /// `build` runs at most once per key. If `remote` is set the object is
    /// created on the cluster before `on_initialized` runs. Concurrent callers
    /// for the same key await the same creation and see its outcome; a failed
    /// creation is forgotten so a later call retries.
    pub async fn get_or_create<T, F>(
        &self,
        service_name: &str,
        name: &str,
        remote: bool,
        build: F,
    ) -> Result<Arc<T>>
    where
        T: DistributedObject,
        F: FnOnce(&DistributedObjectInfo) -> Result<T> + Send + 'static,
    {
        self.ensure_not_disposed()?;
        let info = DistributedObjectInfo::new(service_name, name);

        let creation = {
            let mut objects = self.objects.lock();
            match objects.get(&info) {
                Some(Slot::Ready(entry)) => return downcast::<T>(entry, &info),
                Some(Slot::Creating(creation)) => creation.clone(),
                None => {
                    let creation = create::<T, F>(
                        Arc::clone(&self.messaging),
                        info.clone(),
                        remote,
                        build,
                    )
                    .boxed()
                    .shared();
                    objects.insert(info.clone(), Slot::Creating(creation.clone()));
                    creation
                }
            }
        };

        let outcome = creation.clone().await;

        {
            let mut objects = self.objects.lock();
            let owns_slot = matches!(
                objects.get(&info),
                Some(Slot::Creating(current)) if current.ptr_eq(&creation)
            );
            if owns_slot {
                match &outcome {
                    Ok(entry) if !self.disposed.load(Ordering::Acquire) => {
                        objects.insert(info.clone(), Slot::Ready(entry.clone()));
                    }
                    _ => {
                        objects.remove(&info);
                    }
                }
            }
        }

        let entry = outcome?;
        if self.disposed.load(Ordering::Acquire) {
            if !entry.orphan_claimed.swap(true, Ordering::AcqRel) {
                dispose_quietly(&entry.object).await;
            }
            return Err(HazelcastError::Disposed("distributed object factory"));
        }
        downcast::<T>(&entry, &info)
    }

    /// Destroys `object` locally and on the cluster.
    ///
    /// The local proxy is disposed (failures are logged) and
    /// `ClientDestroyProxy` is always sent.
    #[instrument(
        name = "object_factory.destroy",
        skip(self, object),
        fields(service = object.service_name(), name = object.name())
    )]
    pub async fn destroy(&self, object: &dyn DistributedObject) -> Result<()> {
        let info = DistributedObjectInfo::new(object.service_name(), object.name());

        let removed = self.objects.lock().remove(&info);
        if let Some(Slot::Ready(entry)) = removed {
            dispose_quietly(&entry.object).await;
        }

        if let Err(e) = object.destroying().await {
            warn!(error = %e, "destroying hook failed");
        }

        let request = client_destroy_proxy::encode_request(info.name(), info.service_name());
        let response = self.messaging.invoke(request, InvocationTarget::Any).await?;
        client_destroy_proxy::decode_response(&response)
    }

    /// Forgets the proxy for `info` without touching the cluster.
    ///
    /// Used by proxies disposing themselves.
    pub fn release(&self, info: &DistributedObjectInfo) -> bool {
        let mut objects = self.objects.lock();
        match objects.get(info) {
            Some(Slot::Ready(_)) => objects.remove(info).is_some(),
            _ => false,
        }
    }

    /// Aligns local proxies with the objects the cluster knows about.
    ///
    /// Local proxies missing on the cluster are removed and disposed. The
    /// cluster's list is returned; no proxies are created for it.
    #[instrument(name = "object_factory.reconcile_all", skip(self))]
    pub async fn reconcile_all(&self) -> Result<Vec<DistributedObjectInfo>> {
        self.ensure_not_disposed()?;

        let request = client_get_distributed_objects::encode_request();
        let response = self.messaging.invoke(request, InvocationTarget::Any).await?;
        let cluster_objects = client_get_distributed_objects::decode_response(&response)?;

        let stale: Vec<ProxyEntry> = {
            let on_cluster: HashSet<&DistributedObjectInfo> = cluster_objects.iter().collect();
            let mut objects = self.objects.lock();
            let keys: Vec<DistributedObjectInfo> = objects
                .iter()
                .filter(|(info, slot)| matches!(slot, Slot::Ready(_)) && !on_cluster.contains(info))
                .map(|(info, _)| info.clone())
                .collect();
            keys.iter()
                .filter_map(|info| match objects.remove(info) {
                    Some(Slot::Ready(entry)) => Some(entry),
                    _ => None,
                })
                .collect()
        };

        for entry in &stale {
            debug!(
                service = entry.object.service_name(),
                name = entry.object.name(),
                "removing object unknown to the cluster"
            );
            dispose_quietly(&entry.object).await;
        }
        Ok(cluster_objects)
    }

    /// Recreates known objects on a cluster reached through `connection`.
    ///
    /// Runs when the first connection opens. Objects are replayed if the
    /// cluster is new or a previous replay failed; a failure keeps the replay
    /// pending for the next first connection. If `connection` went down the
    /// replay is abandoned without error.
    #[instrument(
        name = "object_factory.on_connection_opened",
        skip(self, connection),
        fields(id = %connection.id(), is_new_cluster)
    )]
    pub async fn on_connection_opened(
        &self,
        connection: &Arc<Connection>,
        is_new_cluster: bool,
    ) -> Result<()> {
        let mut must_replay = self.must_replay.lock().await;
        if self.disposed.load(Ordering::Acquire) {
            return Ok(());
        }
        if is_new_cluster {
            *must_replay = true;
        }
        if !*must_replay {
            return Ok(());
        }

        let proxies: Vec<(String, String)> = self
            .known_objects()
            .into_iter()
            .map(|info| (info.name().to_string(), info.service_name().to_string()))
            .collect();
        if proxies.is_empty() {
            *must_replay = false;
            return Ok(());
        }
        if !connection.is_active() {
            debug!("connection closed before replay, keeping replay pending");
            return Ok(());
        }

        let request = client_create_proxies::encode_request(&proxies);
        let outcome = match self.messaging.send_to_connection(request, connection).await {
            Ok(response) => client_create_proxies::decode_response(&response),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                debug!(count = proxies.len(), "replayed distributed objects");
                *must_replay = false;
                Ok(())
            }
            Err(e) if !connection.is_active() => {
                debug!(error = %e, "connection closed during replay, keeping replay pending");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "failed to replay distributed objects");
                Err(e)
            }
        }
    }

    /// Disposes every proxy. Runs once; later calls do nothing.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let entries: Vec<ProxyEntry> = self
            .objects
            .lock()
            .drain()
            .filter_map(|(_, slot)| match slot {
                Slot::Ready(entry) => Some(entry),
                Slot::Creating(_) => None,
            })
            .collect();

        for entry in &entries {
            dispose_quietly(&entry.object).await;
        }
        debug!(count = entries.len(), "distributed object factory disposed");
    }
}

async fn create<T, F>(
    messaging: Arc<dyn ClusterMessaging>,
    info: DistributedObjectInfo,
    remote: bool,
    build: F,
) -> Result<ProxyEntry>
where
    T: DistributedObject,
    F: FnOnce(&DistributedObjectInfo) -> Result<T> + Send + 'static,
{
    let object = Arc::new(build(&info)?);

    if remote {
        let request = client_create_proxy::encode_request(info.name(), info.service_name());
        let response = messaging.invoke(request, InvocationTarget::Any).await?;
        client_create_proxy::decode_response(&response)?;
    }

    let object: Arc<dyn DistributedObject> = object;
    if let Err(e) = object.on_initialized().await {
        dispose_quietly(&object).await;
        return Err(e);
    }

    Ok(ProxyEntry {
        object,
        type_name: type_name::<T>(),
        orphan_claimed: Arc::new(AtomicBool::new(false)),
    })
}

fn downcast<T: DistributedObject>(entry: &ProxyEntry, info: &DistributedObjectInfo) -> Result<Arc<T>> {
    Arc::clone(&entry.object)
        .as_any()
        .downcast::<T>()
        .map_err(|_| HazelcastError::TypeMismatch {
            service_name: info.service_name().to_string(),
            name: info.name().to_string(),
            existing: entry.type_name,
            requested: type_name::<T>(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use hazelcast_core::protocol::client_codecs::encode_empty_response;
    use hazelcast_core::protocol::{
        CLIENT_CREATE_PROXY, CLIENT_DESTROY_PROXY, CLIENT_GET_DISTRIBUTED_OBJECTS,
    };
    use hazelcast_core::ClientMessage;

    const MAP_SERVICE: &str = "hz:impl:mapService";

    #[derive(Default)]
    struct ScriptedMessaging {
        requests: Mutex<Vec<i32>>,
        cluster_objects: Vec<DistributedObjectInfo>,
        fail_create: AtomicBool,
    }

    impl ScriptedMessaging {
        fn count(&self, message_type: i32) -> usize {
            self.requests
                .lock()
                .iter()
                .filter(|t| **t == message_type)
                .count()
        }
    }

    #[async_trait]
    impl ClusterMessaging for ScriptedMessaging {
        async fn invoke(
            &self,
            message: ClientMessage,
            _target: InvocationTarget,
        ) -> Result<ClientMessage> {
            let message_type = message.message_type().unwrap_or_default();
            self.requests.lock().push(message_type);
            tokio::time::sleep(Duration::from_millis(20)).await;

            match message_type {
                CLIENT_CREATE_PROXY if self.fail_create.load(Ordering::SeqCst) => {
                    Err(HazelcastError::TargetDisconnected("member left".into()))
                }
                CLIENT_GET_DISTRIBUTED_OBJECTS => Ok(client_get_distributed_objects::encode_response(
                    0,
                    &self.cluster_objects,
                )),
                other => Ok(encode_empty_response(other, 0)),
            }
        }

        async fn send_to_connection(
            &self,
            message: ClientMessage,
            _connection: &Arc<Connection>,
        ) -> Result<ClientMessage> {
            self.invoke(message, InvocationTarget::Any).await
        }
    }

    #[derive(Debug)]
    struct TestMap {
        name: String,
        initialized: AtomicUsize,
        disposed: Arc<AtomicUsize>,
    }

    impl TestMap {
        fn build(disposed: Arc<AtomicUsize>) -> impl FnOnce(&DistributedObjectInfo) -> Result<TestMap> {
            move |info| {
                Ok(TestMap {
                    name: info.name().to_string(),
                    initialized: AtomicUsize::new(0),
                    disposed,
                })
            }
        }
    }

    #[async_trait]
    impl DistributedObject for TestMap {
        fn name(&self) -> &str {
            &self.name
        }

        fn service_name(&self) -> &str {
            MAP_SERVICE
        }

        async fn on_initialized(&self) -> Result<()> {
            self.initialized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn dispose(&self) -> Result<()> {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            Err(HazelcastError::Connection("dispose failures are swallowed".into()))
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    #[derive(Debug)]
    struct OtherProxy;

    #[async_trait]
    impl DistributedObject for OtherProxy {
        fn name(&self) -> &str {
            "orders"
        }

        fn service_name(&self) -> &str {
            MAP_SERVICE
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    fn factory(messaging: Arc<ScriptedMessaging>) -> DistributedObjectFactory {
        DistributedObjectFactory::new(messaging)
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_builds_once() {
        let messaging = Arc::new(ScriptedMessaging::default());
        let factory = factory(Arc::clone(&messaging));
        let disposed = Arc::new(AtomicUsize::new(0));

        let builds = Arc::new(AtomicUsize::new(0));
        let requests = (0..10).map(|_| {
            let builds = Arc::clone(&builds);
            let build = TestMap::build(Arc::clone(&disposed));
            factory.get_or_create(MAP_SERVICE, "orders", true, move |info| {
                builds.fetch_add(1, Ordering::SeqCst);
                build(info)
            })
        });
        let proxies: Vec<Arc<TestMap>> = futures::future::join_all(requests)
            .await
            .into_iter()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(messaging.count(CLIENT_CREATE_PROXY), 1);
        assert!(proxies.iter().all(|p| Arc::ptr_eq(p, &proxies[0])));
        assert_eq!(proxies[0].initialized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_local_creation_sends_nothing() {
        let messaging = Arc::new(ScriptedMessaging::default());
        let factory = factory(Arc::clone(&messaging));

        factory
            .get_or_create(MAP_SERVICE, "local", false, TestMap::build(Arc::default()))
            .await
            .unwrap();
        assert!(messaging.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_creation_is_retried_later() {
        let messaging = Arc::new(ScriptedMessaging::default());
        messaging.fail_create.store(true, Ordering::SeqCst);
        let factory = factory(Arc::clone(&messaging));
        let info = DistributedObjectInfo::new(MAP_SERVICE, "orders");

        let err = factory
            .get_or_create(MAP_SERVICE, "orders", true, TestMap::build(Arc::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, HazelcastError::TargetDisconnected(_)));
        assert!(!factory.contains(&info));

        messaging.fail_create.store(false, Ordering::SeqCst);
        factory
            .get_or_create(MAP_SERVICE, "orders", true, TestMap::build(Arc::default()))
            .await
            .unwrap();
        assert!(factory.contains(&info));
        assert_eq!(messaging.count(CLIENT_CREATE_PROXY), 2);
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let factory = factory(Arc::new(ScriptedMessaging::default()));
        factory
            .get_or_create(MAP_SERVICE, "orders", false, TestMap::build(Arc::default()))
            .await
            .unwrap();

        let err = factory
            .get_or_create(MAP_SERVICE, "orders", false, |_| Ok(OtherProxy))
            .await
            .unwrap_err();
        match err {
            HazelcastError::TypeMismatch { existing, requested, .. } => {
                assert!(existing.ends_with("TestMap"));
                assert!(requested.ends_with("OtherProxy"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_destroy_disposes_and_always_sends_destroy() {
        let messaging = Arc::new(ScriptedMessaging::default());
        let factory = factory(Arc::clone(&messaging));
        let disposed = Arc::new(AtomicUsize::new(0));

        let proxy = factory
            .get_or_create(MAP_SERVICE, "orders", true, TestMap::build(Arc::clone(&disposed)))
            .await
            .unwrap();
        factory.destroy(proxy.as_ref()).await.unwrap();

        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert!(factory.known_objects().is_empty());
        assert_eq!(messaging.count(CLIENT_DESTROY_PROXY), 1);

        factory.destroy(proxy.as_ref()).await.unwrap();
        assert_eq!(messaging.count(CLIENT_DESTROY_PROXY), 2);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_is_local_only() {
        let messaging = Arc::new(ScriptedMessaging::default());
        let factory = factory(Arc::clone(&messaging));
        let info = DistributedObjectInfo::new(MAP_SERVICE, "orders");

        factory
            .get_or_create(MAP_SERVICE, "orders", false, TestMap::build(Arc::default()))
            .await
            .unwrap();
        assert!(factory.release(&info));
        assert!(!factory.release(&info));
        assert!(messaging.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_all() {
        let cluster_objects = vec![
            DistributedObjectInfo::new(MAP_SERVICE, "b"),
            DistributedObjectInfo::new(MAP_SERVICE, "c"),
            DistributedObjectInfo::new(MAP_SERVICE, "d"),
        ];
        let messaging = Arc::new(ScriptedMessaging {
            cluster_objects: cluster_objects.clone(),
            ..ScriptedMessaging::default()
        });
        let factory = factory(Arc::clone(&messaging));
        let disposed = Arc::new(AtomicUsize::new(0));

        for name in ["a", "b", "c"] {
            factory
                .get_or_create(MAP_SERVICE, name, false, TestMap::build(Arc::clone(&disposed)))
                .await
                .unwrap();
        }

        let reported = factory.reconcile_all().await.unwrap();
        assert_eq!(reported, cluster_objects);

        let mut known = factory.known_objects();
        known.sort();
        assert_eq!(
            known,
            vec![
                DistributedObjectInfo::new(MAP_SERVICE, "b"),
                DistributedObjectInfo::new(MAP_SERVICE, "c"),
            ]
        );
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispose_is_tolerant_and_one_shot() {
        let factory = factory(Arc::new(ScriptedMessaging::default()));
        let disposed = Arc::new(AtomicUsize::new(0));
        for name in ["a", "b"] {
            factory
                .get_or_create(MAP_SERVICE, name, false, TestMap::build(Arc::clone(&disposed)))
                .await
                .unwrap();
        }

        factory.dispose().await;
        factory.dispose().await;
        assert_eq!(disposed.load(Ordering::SeqCst), 2);

        let err = factory
            .get_or_create(MAP_SERVICE, "c", false, TestMap::build(Arc::clone(&disposed)))
            .await
            .unwrap_err();
        assert!(matches!(err, HazelcastError::Disposed(_)));
    }

    #[tokio::test]
    async fn test_object_created_during_dispose_is_disposed() {
        let messaging = Arc::new(ScriptedMessaging::default());
        let factory = Arc::new(factory(Arc::clone(&messaging)));
        let disposed = Arc::new(AtomicUsize::new(0));

        let creating = {
            let factory = Arc::clone(&factory);
            let disposed = Arc::clone(&disposed);
            tokio::spawn(async move {
                factory
                    .get_or_create(MAP_SERVICE, "late", true, TestMap::build(disposed))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        factory.dispose().await;

        let result = creating.await.unwrap();
        assert!(matches!(result, Err(HazelcastError::Disposed(_))));
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }
}
