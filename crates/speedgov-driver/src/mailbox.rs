//! 最新值邮箱（Last Write Wins）
//!
//! 单生产者、单消费者，最多持有一个未读值。
//!
//! 生产者淹没消费者时，旧值直接被覆盖；消费者读到的永远是最新发布的值，
//! 不会出现排队的过期读数决定机器人速度的情况。

use parking_lot::Mutex;

/// 单槽邮箱
///
/// 覆盖计数由调用方根据 [`Mailbox::publish`] 的返回值记录。
///
/// # Example
///
/// ```
/// use speedgov_driver::Mailbox;
///
/// let mailbox = Mailbox::new();
/// assert!(!mailbox.publish(1.0f32));
/// assert!(mailbox.publish(2.0f32));
///
/// assert_eq!(mailbox.try_take_latest(), Some(2.0));
/// assert_eq!(mailbox.try_take_latest(), None);
/// ```
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// 发布新值（永不阻塞调用方超过一次短暂的锁）
    ///
    /// 返回 `true` 表示覆盖了一个未读值。
    pub fn publish(&self, value: T) -> bool {
        // 短作用域：锁内只做替换，旧值在锁外 drop
        let previous = {
            let mut slot = self.slot.lock();
            slot.replace(value)
        };

        previous.is_some()
    }

    /// 取出最新值；自上次取出后没有新值则返回 `None`
    pub fn try_take_latest(&self) -> Option<T> {
        self.slot.lock().take()
    }

    /// 丢弃未读值，返回是否丢弃了值
    pub fn clear(&self) -> bool {
        self.slot.lock().take().is_some()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
