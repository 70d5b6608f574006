use attrdb::codec::encode_attr;
use attrdb::{
    AttrArray, AttrDefs, NoActions, ObjectKey, ObjectKind, StoredAttr, recover_attrs,
    recover_attrs_raw,
};
use serde_json::{Map, Value, json};

use crate::server::attrdefs::{
    JOB_ATTR_DEFS, JobAttrActions, QUEUE_ATTR_DEFS, QueueAttrActions, SERVER_ATTR_DEFS,
};
use crate::server::core::{Core, SERVER_OBJECT_ID};
use crate::server::job::Job;
use crate::server::queue::Queue;

/// Rebuilds the server, queue, job and node tables from the attribute store.
///
/// A job that cannot be read or has no valid state is skipped; a failure to read the server
/// object aborts the recovery.
pub fn recover_server_state(core: &mut Core) -> crate::Result<()> {
    let store = core.store();
    let resources = core.resources();

    let mut server_attrs = AttrArray::new(&SERVER_ATTR_DEFS);
    recover_attrs(
        store,
        &ObjectKey::new(ObjectKind::Server, SERVER_OBJECT_ID),
        &SERVER_ATTR_DEFS,
        &mut server_attrs,
        resources,
        &mut NoActions,
    )?;

    let mut queues = Vec::new();
    for name in store.object_ids(ObjectKind::Queue) {
        let mut queue = Queue::new(name.as_str());
        recover_attrs(
            store,
            &ObjectKey::new(ObjectKind::Queue, name.as_str()),
            &QUEUE_ATTR_DEFS,
            &mut queue.attrs,
            resources,
            &mut QueueAttrActions,
        )?;
        queues.push(queue);
    }

    let mut jobs = Vec::new();
    for job_id in store.object_ids(ObjectKind::Job) {
        let mut attrs = AttrArray::new(&JOB_ATTR_DEFS);
        if let Err(error) = recover_attrs(
            store,
            &ObjectKey::new(ObjectKind::Job, job_id.as_str()),
            &JOB_ATTR_DEFS,
            &mut attrs,
            resources,
            &mut JobAttrActions,
        ) {
            log::error!("Cannot recover job {job_id}: {error}");
            continue;
        }
        match Job::from_attrs(job_id.as_str(), attrs) {
            Some(job) => jobs.push(job),
            None => log::warn!("Job {job_id} has no valid state, skipping"),
        }
    }

    let mut nodes = Vec::new();
    for name in store.object_ids(ObjectKind::Node) {
        let mut records = Vec::new();
        recover_attrs_raw(
            store,
            &ObjectKey::new(ObjectKind::Node, name.as_str()),
            &mut records,
        )?;
        nodes.push((name, records));
    }

    log::info!(
        "Recovered {} queues, {} jobs and {} nodes",
        queues.len(),
        jobs.len(),
        nodes.len()
    );
    core.set_server_attrs(server_attrs);
    for queue in queues {
        core.add_queue(queue);
    }
    for job in jobs {
        core.add_job(job);
    }
    for (name, records) in nodes {
        core.set_node(name, records);
    }
    Ok(())
}

fn record_key(record: &StoredAttr) -> String {
    match &record.resource {
        Some(resource) => format!("{}.{resource}", record.name),
        None => record.name.clone(),
    }
}

fn insert_records(map: &mut Map<String, Value>, records: &[StoredAttr]) {
    for record in records {
        map.insert(record_key(record), Value::String(record.value.clone()));
    }
}

fn attrs_to_json(defs: &AttrDefs, attrs: &AttrArray) -> Value {
    let mut map = Map::new();
    for (def, attr) in defs.iter().zip(attrs.iter()) {
        match encode_attr(def, attr) {
            Ok(records) => insert_records(&mut map, &records),
            Err(error) => log::warn!("Cannot encode attribute {}: {error}", def.name),
        }
    }
    Value::Object(map)
}

/// Renders the recovered tables as JSON, optionally limited to one object kind.
pub fn dump_state(core: &Core, kind: Option<ObjectKind>) -> Value {
    let wanted = |k: ObjectKind| kind.is_none_or(|kind| kind == k);
    let mut output = Map::new();
    if wanted(ObjectKind::Server) {
        output.insert(
            "server".to_string(),
            attrs_to_json(&SERVER_ATTR_DEFS, core.server_attrs()),
        );
    }
    if wanted(ObjectKind::Queue) {
        let queues: Map<_, _> = core
            .queues()
            .map(|queue| (queue.name.clone(), attrs_to_json(&QUEUE_ATTR_DEFS, &queue.attrs)))
            .collect();
        output.insert("queues".to_string(), Value::Object(queues));
    }
    if wanted(ObjectKind::Job) {
        let jobs: Map<_, _> = core
            .jobs()
            .map(|job| (job.id.clone(), attrs_to_json(&JOB_ATTR_DEFS, &job.attrs)))
            .collect();
        output.insert("jobs".to_string(), Value::Object(jobs));
    }
    if wanted(ObjectKind::Node) {
        let nodes: Map<_, _> = core
            .nodes()
            .map(|(name, records)| {
                let mut map = Map::new();
                insert_records(&mut map, records);
                (name.clone(), Value::Object(map))
            })
            .collect();
        output.insert("nodes".to_string(), Value::Object(nodes));
    }
    json!(output)
}
