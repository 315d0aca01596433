//! Pipeline builder for constructing node graphs
//!
//! Every connection is one bounded stage queue with exactly one producer and
//! one consumer; fan-out is a node's job (see `Tee`). `build()` creates the
//! queues, registers the close cascade along every edge and starts one
//! worker per node.

use super::errors::ConnectionError;
use super::node::{InputPort, OutputPort, ProcessNode};
use super::ports::PortSchema;
use super::scheduler::Scheduler;
use super::sender::{CloseHandle, Message};
use crossbeam_channel::{Receiver as CrossbeamReceiver, Sender as CrossbeamSender, bounded};
use std::collections::HashMap;
use tracing::{debug, info};

/// Default stage queue depth, in messages
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Pipeline builder that manages nodes and connections
pub struct Pipeline {
    nodes: Vec<(usize, String, Box<dyn ProcessNode>)>,
    node_names: HashMap<String, usize>,
    node_schemas: HashMap<usize, (Vec<PortSchema>, Vec<PortSchema>)>,
    connections: Vec<PendingConnection>,
    next_id: usize,
    default_buffer_size: usize,
}

struct PendingConnection {
    from_node: usize,
    from_port: usize,
    to_node: usize,
    to_port: usize,
    buffer_size: usize,
}

impl Pipeline {
    /// Create a new pipeline
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            node_names: HashMap::new(),
            node_schemas: HashMap::new(),
            connections: Vec::new(),
            next_id: 0,
            default_buffer_size: DEFAULT_QUEUE_DEPTH,
        }
    }

    /// Set the default buffer size for connections
    pub fn with_default_buffer_size(mut self, size: usize) -> Self {
        self.default_buffer_size = size.max(1);
        self
    }

    /// Add a process node under a unique name
    ///
    /// The name is also the worker thread's name.
    pub fn add_process<N: ProcessNode + 'static>(
        &mut self,
        name: impl Into<String>,
        node: N,
    ) -> Result<(), ConnectionError> {
        let name = name.into();

        if self.node_names.contains_key(&name) {
            return Err(ConnectionError::DuplicateNode(name));
        }

        let id = self.next_id;
        self.next_id += 1;

        self.node_schemas
            .insert(id, (node.input_schema(), node.output_schema()));
        self.node_names.insert(name.clone(), id);
        self.nodes.push((id, name, Box::new(node)));

        Ok(())
    }

    /// Connect two nodes by name and port name
    pub fn connect(
        &mut self,
        from_node: &str,
        from_port: &str,
        to_node: &str,
        to_port: &str,
    ) -> Result<(), ConnectionError> {
        self.connect_with_buffer(from_node, from_port, to_node, to_port, self.default_buffer_size)
    }

    /// Connect with custom buffer size
    pub fn connect_with_buffer(
        &mut self,
        from_node: &str,
        from_port: &str,
        to_node: &str,
        to_port: &str,
        buffer_size: usize,
    ) -> Result<(), ConnectionError> {
        let from_id = self.node_id(from_node)?;
        let to_id = self.node_id(to_node)?;

        let from_index = self.find_port(from_id, from_node, from_port, false)?;
        let to_index = self.find_port(to_id, to_node, to_port, true)?;

        if self
            .connections
            .iter()
            .any(|c| c.to_node == to_id && c.to_port == to_index)
        {
            return Err(ConnectionError::DuplicateConnection(format!(
                "Input port '{}' on node '{}' is already connected",
                to_port, to_node
            )));
        }

        if self
            .connections
            .iter()
            .any(|c| c.from_node == from_id && c.from_port == from_index)
        {
            return Err(ConnectionError::DuplicateConnection(format!(
                "Output port '{}' on node '{}' is already connected",
                from_port, from_node
            )));
        }

        self.connections.push(PendingConnection {
            from_node: from_id,
            from_port: from_index,
            to_node: to_id,
            to_port: to_index,
            buffer_size: buffer_size.max(1),
        });

        Ok(())
    }

    fn node_id(&self, name: &str) -> Result<usize, ConnectionError> {
        self.node_names
            .get(name)
            .copied()
            .ok_or_else(|| ConnectionError::NodeNotFound(name.to_string()))
    }

    fn find_port(
        &self,
        id: usize,
        node: &str,
        port: &str,
        input: bool,
    ) -> Result<usize, ConnectionError> {
        let (inputs, outputs) = self
            .node_schemas
            .get(&id)
            .ok_or_else(|| ConnectionError::NodeNotFound(node.to_string()))?;
        let schemas = if input { inputs } else { outputs };
        schemas
            .iter()
            .find(|s| s.name == port)
            .map(|s| s.index)
            .ok_or_else(|| ConnectionError::PortNotFound {
                node: node.to_string(),
                port: port.to_string(),
            })
    }

    /// List all input ports for a node by name
    pub fn list_node_inputs(&self, name: &str) -> Result<&[PortSchema], ConnectionError> {
        let id = self.node_id(name)?;
        Ok(self.node_schemas[&id].0.as_slice())
    }

    /// List all output ports for a node by name
    pub fn list_node_outputs(&self, name: &str) -> Result<&[PortSchema], ConnectionError> {
        let id = self.node_id(name)?;
        Ok(self.node_schemas[&id].1.as_slice())
    }

    /// List all node names
    pub fn list_nodes(&self) -> Vec<&str> {
        self.node_names.keys().map(|s| s.as_str()).collect()
    }

    /// Every port that has no connection yet
    fn check_connected(&self) -> Result<(), ConnectionError> {
        for (id, name, _) in &self.nodes {
            let (inputs, outputs) = &self.node_schemas[id];
            for schema in inputs {
                if !self
                    .connections
                    .iter()
                    .any(|c| c.to_node == *id && c.to_port == schema.index)
                {
                    return Err(ConnectionError::Unconnected {
                        node: name.clone(),
                        port: schema.name.clone(),
                    });
                }
            }
            for schema in outputs {
                if !self
                    .connections
                    .iter()
                    .any(|c| c.from_node == *id && c.from_port == schema.index)
                {
                    return Err(ConnectionError::Unconnected {
                        node: name.clone(),
                        port: schema.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Build the pipeline and return a running scheduler
    pub fn build(self) -> Result<Scheduler, ConnectionError> {
        self.build_with(Scheduler::new())
    }

    /// Build onto a caller-supplied scheduler
    pub fn build_with(mut self, mut scheduler: Scheduler) -> Result<Scheduler, ConnectionError> {
        info!(
            "Building pipeline with {} nodes and {} connections",
            self.nodes.len(),
            self.connections.len()
        );

        self.check_connected()?;

        let names: HashMap<usize, String> = self
            .nodes
            .iter()
            .map(|(id, name, _)| (*id, name.clone()))
            .collect();

        // Phase 1: create every stage queue and its close cascade edge
        type PortKey = (usize, usize);
        let mut receivers: HashMap<PortKey, CrossbeamReceiver<Message>> = HashMap::new();
        let mut senders: HashMap<PortKey, CrossbeamSender<Message>> = HashMap::new();

        for conn in &self.connections {
            let (tx, rx) = bounded::<Message>(conn.buffer_size);
            scheduler.cascade_close(
                names[&conn.from_node].clone(),
                CloseHandle::new(names[&conn.to_node].clone(), tx.clone()),
            );
            receivers.insert((conn.to_node, conn.to_port), rx);
            senders.insert((conn.from_node, conn.from_port), tx);
        }

        // Phase 2: start all nodes
        let watchdog = scheduler.watchdog().clone();

        for (node_id, node_name, node) in self.nodes.drain(..) {
            let (input_schemas, output_schemas) = &self.node_schemas[&node_id];

            debug!("Starting node {}: {}", node_id, node_name);

            let mut input_ports = Vec::with_capacity(input_schemas.len());
            for schema in input_schemas {
                let rx = receivers.remove(&(node_id, schema.index)).ok_or_else(|| {
                    ConnectionError::Unconnected {
                        node: node_name.clone(),
                        port: schema.name.clone(),
                    }
                })?;
                input_ports.push(InputPort::new_with_watchdog(
                    rx,
                    &watchdog,
                    &node_name,
                    &schema.name,
                ));
            }

            let mut output_ports = Vec::with_capacity(output_schemas.len());
            for schema in output_schemas {
                let tx = senders.remove(&(node_id, schema.index)).ok_or_else(|| {
                    ConnectionError::Unconnected {
                        node: node_name.clone(),
                        port: schema.name.clone(),
                    }
                })?;
                output_ports.push(OutputPort::new_with_watchdog(
                    tx,
                    &watchdog,
                    &node_name,
                    &schema.name,
                ));
            }

            scheduler.start_process(node_name, node, input_ports, output_ports)?;
        }

        info!(
            "Pipeline built successfully with {} threads",
            scheduler.num_threads()
        );
        Ok(scheduler)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
