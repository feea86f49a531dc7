//! Execution seam for the background poller.
//!
//! The poller loop never returns, so it needs a context of its own. The
//! driver asks a [`Spawner`] for one instead of creating threads directly,
//! which keeps thread pools and executors outside this crate.

use std::fmt;
use std::thread;

/// Something that can run a blocking closure on a context of its own.
pub trait Spawner {
    /// Run `f`, which may block its context forever.
    fn block(&mut self, f: Box<dyn FnOnce() + Send + 'static>) -> anyhow::Result<()>;
}

impl<T: ?Sized> Spawner for &mut T
where
    T: Spawner,
{
    #[inline]
    fn block(&mut self, f: Box<dyn FnOnce() + Send + 'static>) -> anyhow::Result<()> {
        (**self).block(f)
    }
}

impl<T: ?Sized> Spawner for Box<T>
where
    T: Spawner,
{
    #[inline]
    fn block(&mut self, f: Box<dyn FnOnce() + Send + 'static>) -> anyhow::Result<()> {
        (**self).block(f)
    }
}

/// Runs each closure on a new, named OS thread that is never joined.
#[derive(Clone)]
pub struct ThreadSpawner {
    name: String,
}

impl ThreadSpawner {
    /// Create a spawner naming its threads `name`.
    pub fn new<S: Into<String>>(name: S) -> ThreadSpawner {
        ThreadSpawner { name: name.into() }
    }
}

impl Spawner for ThreadSpawner {
    fn block(&mut self, f: Box<dyn FnOnce() + Send + 'static>) -> anyhow::Result<()> {
        thread::Builder::new().name(self.name.clone()).spawn(f)?;
        Ok(())
    }
}

impl fmt::Debug for ThreadSpawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSpawner").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn thread_spawner_names_threads() {
        let (tx, rx) = mpsc::channel();
        let mut spawner = ThreadSpawner::new("connstate-test");
        spawner
            .block(Box::new(move || {
                let name = thread::current().name().map(String::from);
                tx.send(name).unwrap();
            }))
            .unwrap();
        assert_eq!(rx.recv().unwrap().as_deref(), Some("connstate-test"));
    }

    #[test]
    fn boxed_spawner_forwards() {
        struct Inline(usize);

        impl Spawner for Inline {
            fn block(&mut self, f: Box<dyn FnOnce() + Send + 'static>) -> anyhow::Result<()> {
                self.0 += 1;
                f();
                Ok(())
            }
        }

        let mut inline = Inline(0);
        {
            let mut boxed: Box<dyn Spawner + '_> = Box::new(&mut inline);
            boxed.block(Box::new(|| {})).unwrap();
        }
        assert_eq!(inline.0, 1);
    }
}
