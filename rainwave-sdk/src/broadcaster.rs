//! 事件广播
//!
//! 事件名 → 有序的订阅者列表。发布是同步的，在调用方所在的上下文里依次执行回调。

use crate::events::{Event, EventKind};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::trace;

/// 订阅回调
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// 把闭包包装成 [`Listener`]，保留返回值以便之后取消订阅
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// 事件广播器
#[derive(Default)]
pub struct EventBroadcaster {
    listeners: RwLock<HashMap<EventKind, Vec<Listener>>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅事件。同一个回调订阅两次会被调用两次
    pub fn subscribe(&self, kind: EventKind, listener: Listener) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.entry(kind).or_default().push(listener);
    }

    /// 取消订阅，只移除与 `listener` 指向同一对象的回调
    pub fn unsubscribe(&self, kind: EventKind, listener: &Listener) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = listeners.get_mut(&kind) {
            list.retain(|l| !Arc::ptr_eq(l, listener));
            if list.is_empty() {
                listeners.remove(&kind);
            }
        }
    }

    /// 按订阅顺序同步调用回调；回调 panic 不会被捕获
    pub fn emit(&self, event: &Event) {
        let kind = event.kind();
        // 先复制一份列表再释放锁，回调内部可以再订阅 / 取消订阅
        let snapshot: Vec<Listener> = {
            let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
            match listeners.get(&kind) {
                Some(list) => list.clone(),
                None => return,
            }
        };

        trace!("[Broadcaster] emit {} to {} listeners", kind, snapshot.len());
        for listener in snapshot {
            listener(event);
        }
    }

    /// 当前订阅数
    pub fn count(&self, kind: EventKind) -> usize {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        listeners.get(&kind).map_or(0, Vec::len)
    }
}
