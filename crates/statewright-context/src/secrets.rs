use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use minijinja::Value;
use minijinja::value::{Enumerator, Object};

/// Source of secret values, consulted only when an expression reads one.
pub trait SecretResolver: Send + Sync {
  fn resolve(&self, name: &str) -> Option<String>;
}

/// `secrets.<name>` binding that decrypts each secret on first access.
pub(crate) struct LazySecrets {
  resolver: Arc<dyn SecretResolver>,
  cache: Mutex<HashMap<String, Option<String>>>,
}

impl LazySecrets {
  pub(crate) fn new(resolver: Arc<dyn SecretResolver>) -> Self {
    Self {
      resolver,
      cache: Mutex::new(HashMap::new()),
    }
  }

  fn lookup(&self, name: &str) -> Option<String> {
    let Ok(mut cache) = self.cache.lock() else {
      return self.resolver.resolve(name);
    };
    cache
      .entry(name.to_string())
      .or_insert_with(|| self.resolver.resolve(name))
      .clone()
  }
}

impl fmt::Debug for LazySecrets {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LazySecrets").finish_non_exhaustive()
  }
}

impl Object for LazySecrets {
  fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
    let name = key.as_str()?;
    self.lookup(name).map(Value::from)
  }

  fn enumerate(self: &Arc<Self>) -> Enumerator {
    Enumerator::NonEnumerable
  }
}
