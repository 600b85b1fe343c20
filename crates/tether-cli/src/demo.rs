//! The demo graph: two nodes that befriend each other.

use tether_core::{persistent_class, CoreResult, Engine, EntityId, Persistent, Value};

persistent_class! {
    /// A named node with one friend, a tag list and an attribute map.
    pub struct Node {
        name,
        friend,
        tags,
        attrs,
    }
}

/// Ids of the two demo nodes.
#[derive(Clone, Copy, Debug)]
pub struct DemoGraph {
    pub first: EntityId,
    pub second: EntityId,
}

/// Build the graph in `engine` and flush it.
pub fn build(engine: &Engine) -> CoreResult<DemoGraph> {
    engine.register::<Node>()?;

    let a: Node = engine.create()?;
    let b: Node = engine.create()?;
    a.name().set("Ada")?;
    b.name().set("Brin")?;
    a.friend().set(b.to_value())?;
    b.friend().set(a.to_value())?;

    let tags = engine.wrap_sequence(["explorer", "trader"])?;
    tags.append(b.to_value())?;
    a.tags().set(tags)?;
    b.tags().set(engine.new_sequence()?)?;

    a.attrs().set(engine.wrap_map([("credits", Value::Int(1000)), ("sector", Value::Int(7))])?)?;
    b.attrs().set(Value::Null)?;

    engine.flush()?;
    Ok(DemoGraph {
        first: a.id(),
        second: b.id(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tether_core::{CacheMode, EngineConfig};
    use tether_store::InMemoryRowStore;

    use super::*;

    #[test]
    fn demo_graph_survives_reload() {
        let store = Arc::new(InMemoryRowStore::new());
        let config = EngineConfig {
            cache_mode: CacheMode::Manual,
            ..EngineConfig::default()
        };
        let graph = {
            let engine = Engine::open(store.clone(), config.clone()).unwrap();
            build(&engine).unwrap()
        };

        let engine = Engine::open(store, config).unwrap();
        engine.register::<Node>().unwrap();
        assert_eq!(engine.reload_all().unwrap(), 2);

        let a: Node = engine.get(graph.first).unwrap().unwrap();
        let b: Node = engine.get(graph.second).unwrap().unwrap();
        let friend = a.friend().get().unwrap();
        assert!(friend.as_record().unwrap().ptr_eq(b.record()));

        let tags = a.tags().get().unwrap().as_sequence().unwrap().clone();
        assert_eq!(tags.len(), 3);
        assert!(tags.get(2).unwrap().as_record().unwrap().ptr_eq(b.record()));
        assert!(b.tags().get().unwrap().as_sequence().unwrap().is_empty());
        assert!(b.attrs().get().unwrap().is_null());
    }
}
