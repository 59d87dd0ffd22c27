//! 依赖图构建和拓扑排序
//!
//! 分析节点之间的资源依赖关系，构建 DAG 并进行拓扑排序。
//! 使用 petgraph 存储图并计算强连通分量，用于环检测与部分编译。
//!
//! 每个资源按注册顺序维护一条写入版本链 `W1 -> W2 -> ... -> Wk`：
//! - 写后写：`W(i) -> W(i+1)`
//! - 读：绑定到注册在它之前的最后一个写者；没有则绑定到本帧第一个写者
//! - 读后写：读者在它所绑定版本的下一个写者之前执行
//! - 本帧没有写者的资源是持久资源，读取不产生边

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet, VecDeque};

use indexmap::IndexMap;
use itertools::Itertools;
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::frame_graph::{FgAccess, FgNodeDeclaration, NodeId, ResourceId};

/// 依赖边数据：导致依赖的资源
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FgEdge {
    pub resources: Vec<ResourceId>,
}

/// 两个以上节点以纯 `Write` 声明同一资源
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FgWriteConflict {
    pub resource: ResourceId,
    /// 按注册顺序，编译结果也按此顺序串行化
    pub writers: Vec<NodeId>,
}

/// 一条检测到的环
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FgCycleReport {
    /// 闭合的节点链，首尾相同
    pub nodes: Vec<NodeId>,
    /// 每一跳对应的资源，`resources[i]` 连接 `nodes[i] -> nodes[i + 1]`
    pub resources: Vec<ResourceId>,
    pub suggestions: Vec<String>,
}

/// 排序结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FgSchedule {
    /// 执行顺序（可能是部分的）
    pub order: Vec<NodeId>,
    pub cycles: Vec<FgCycleReport>,
    /// 出现在任意环上的节点，按注册顺序
    pub cycle_nodes: Vec<NodeId>,
    /// 未进入执行顺序的节点（环上的节点 + 被标记的节点），按注册顺序
    pub excluded: Vec<NodeId>,
}

/// 单个节点对某个资源的合并使用
#[derive(Clone, Copy, Debug, Default)]
struct ResourceUse {
    /// 单独的 `Read` 声明
    plain_read: bool,
    /// 单独的 `Write` 声明
    plain_write: bool,
    /// `ReadWrite` 声明
    read_write: bool,
}

impl ResourceUse {
    #[inline]
    fn reads(&self) -> bool {
        self.plain_read || self.read_write
    }

    #[inline]
    fn writes(&self) -> bool {
        self.plain_write || self.read_write
    }

    /// 分开声明了读和写，且没有显式的读-改-写
    #[inline]
    fn is_split_read_write(&self) -> bool {
        self.plain_read && self.plain_write && !self.read_write
    }

    /// 纯写（不读旧内容）
    #[inline]
    fn is_pure_write(&self) -> bool {
        self.plain_write && !self.reads()
    }
}

/// 依赖图
///
/// 节点存储 [`NodeId`]，边存储导致依赖的资源。节点按注册顺序插入，
/// 因此 `NodeIndex::index() == NodeId::index()`。
pub struct FgDependencyGraph {
    graph: DiGraph<NodeId, FgEdge>,
    /// 自环：节点分别声明读、写同一资源，且没有其他节点参与
    self_loops: Vec<(NodeId, ResourceId)>,
    write_conflicts: Vec<FgWriteConflict>,
}

// build
impl FgDependencyGraph {
    /// 从节点声明构建依赖图
    pub fn build(declarations: &[FgNodeDeclaration]) -> Self {
        let node_count = declarations.len();
        let mut graph = DiGraph::with_capacity(node_count, node_count * 2);
        for decl in declarations {
            graph.add_node(decl.id);
        }

        let mut dep_graph = Self {
            graph,
            self_loops: Vec::new(),
            write_conflicts: Vec::new(),
        };

        // 资源 -> 按注册顺序的 (节点, 合并后的使用)
        let mut uses: IndexMap<ResourceId, Vec<(usize, ResourceUse)>> = IndexMap::new();
        for (node_idx, decl) in declarations.iter().enumerate() {
            for dep in decl.dependencies() {
                let per_node = uses.entry(dep.resource).or_default();
                if !matches!(per_node.last(), Some((idx, _)) if *idx == node_idx) {
                    per_node.push((node_idx, ResourceUse::default()));
                }
                let Some((_, entry)) = per_node.last_mut() else {
                    continue;
                };
                match dep.access {
                    FgAccess::Read => entry.plain_read = true,
                    FgAccess::Write => entry.plain_write = true,
                    FgAccess::ReadWrite => entry.read_write = true,
                }
            }
        }

        for (resource, users) in &uses {
            dep_graph.link_resource(*resource, users);
        }

        dep_graph
    }

    fn link_resource(&mut self, resource: ResourceId, users: &[(usize, ResourceUse)]) {
        if let [(node, usage)] = users
            && usage.is_split_read_write()
        {
            self.self_loops.push((NodeId::new(*node), resource));
            return;
        }

        let writers: Vec<usize> = users.iter().filter(|(_, u)| u.writes()).map(|(n, _)| *n).collect();
        if writers.is_empty() {
            // 持久资源：内容来自之前的帧或外部，读取不需要排序
            return;
        }

        let pure_writers: Vec<NodeId> =
            users.iter().filter(|(_, u)| u.is_pure_write()).map(|(n, _)| NodeId::new(*n)).collect();
        if pure_writers.len() > 1 {
            self.write_conflicts.push(FgWriteConflict {
                resource,
                writers: pure_writers,
            });
        }

        // 写后写
        for (prev, next) in writers.iter().tuple_windows() {
            self.add_dependency(*prev, *next, resource);
        }

        // 读后写 / 写后读
        for (node, usage) in users {
            if !usage.reads() {
                continue;
            }
            let version = writers.iter().rposition(|w| w < node).unwrap_or(0);
            let bound_writer = writers[version];
            if bound_writer == *node {
                continue;
            }
            self.add_dependency(bound_writer, *node, resource);
            if let Some(&next_writer) = writers.get(version + 1)
                && next_writer != *node
            {
                self.add_dependency(*node, next_writer, resource);
            }
        }
    }

    fn add_dependency(&mut self, producer: usize, consumer: usize, resource: ResourceId) {
        let (a, b) = (NodeIndex::new(producer), NodeIndex::new(consumer));
        match self.graph.find_edge(a, b) {
            Some(edge) => {
                let data = &mut self.graph[edge];
                if !data.resources.contains(&resource) {
                    data.resources.push(resource);
                }
            }
            None => {
                self.graph.add_edge(
                    a,
                    b,
                    FgEdge {
                        resources: vec![resource],
                    },
                );
            }
        }
    }
}

// getter
impl FgDependencyGraph {
    #[inline]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// 所有边 `(producer, consumer, resources)`
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId, &[ResourceId])> {
        self.graph.edge_references().map(|e| {
            (self.graph[e.source()], self.graph[e.target()], e.weight().resources.as_slice())
        })
    }

    /// 是否存在 `producer -> consumer` 的直接边
    pub fn has_edge(&self, producer: NodeId, consumer: NodeId) -> bool {
        self.graph.find_edge(NodeIndex::new(producer.index()), NodeIndex::new(consumer.index())).is_some()
    }

    #[inline]
    pub fn write_conflicts(&self) -> &[FgWriteConflict] {
        &self.write_conflicts
    }

    #[inline]
    pub fn self_loops(&self) -> &[(NodeId, ResourceId)] {
        &self.self_loops
    }

    /// 按节点编号排序的直接后继
    fn sorted_successors(&self, node: usize) -> Vec<usize> {
        self.graph
            .neighbors_directed(NodeIndex::new(node), Direction::Outgoing)
            .map(|n| n.index())
            .sorted()
            .collect()
    }
}

// sort
impl FgDependencyGraph {
    /// Kahn 拓扑排序，只考虑 `allowed` 中的节点
    ///
    /// 多个节点同时入度为 0 时按注册顺序出队，保证结果确定。
    pub fn topological_sort(&self, allowed: &[bool]) -> Vec<NodeId> {
        let node_count = self.node_count();
        let mut in_degrees = vec![0usize; node_count];
        for edge in self.graph.edge_references() {
            let (src, dst) = (edge.source().index(), edge.target().index());
            if allowed[src] && allowed[dst] {
                in_degrees[dst] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> =
            (0..node_count).filter(|&i| allowed[i] && in_degrees[i] == 0).map(Reverse).collect();
        let mut order = Vec::with_capacity(node_count);

        while let Some(Reverse(node)) = ready.pop() {
            order.push(NodeId::new(node));
            for succ in self.graph.neighbors_directed(NodeIndex::new(node), Direction::Outgoing) {
                let succ = succ.index();
                if !allowed[succ] {
                    continue;
                }
                in_degrees[succ] -= 1;
                if in_degrees[succ] == 0 {
                    ready.push(Reverse(succ));
                }
            }
        }

        order
    }

    /// 排序；有环时做环分析并对剩余节点做部分编译
    ///
    /// - `flagged`：因为资源失效等原因必须排除的节点
    /// - `describe`：把资源 ID 格式化为人类可读的名字，用于生成建议
    pub fn schedule(
        &self,
        declarations: &[FgNodeDeclaration],
        flagged: &HashSet<NodeId>,
        describe: impl Fn(ResourceId) -> String,
    ) -> FgSchedule {
        let node_count = self.node_count();
        let all = vec![true; node_count];
        let full_order = self.topological_sort(&all);

        let (cycles, cycle_nodes) = if full_order.len() == node_count && self.self_loops.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            self.analyze_cycles(declarations, &describe)
        };

        let mut excluded_mask = vec![false; node_count];
        for id in cycle_nodes.iter().chain(flagged.iter()) {
            if let Some(slot) = excluded_mask.get_mut(id.index()) {
                *slot = true;
            }
        }
        let allowed: Vec<bool> = excluded_mask.iter().map(|excluded| !excluded).collect();
        let excluded = (0..node_count).filter(|&i| excluded_mask[i]).map(NodeId::new).collect();

        let order = if cycle_nodes.is_empty() && flagged.is_empty() {
            full_order
        } else {
            self.topological_sort(&allowed)
        };

        FgSchedule {
            order,
            cycles,
            cycle_nodes,
            excluded,
        }
    }
}

// cycle analysis
impl FgDependencyGraph {
    /// 环上的节点 = 非平凡强连通分量中的节点 + 自环节点
    ///
    /// 对每个尚未被任何报告覆盖的环上节点，报告经过它的最短环，
    /// 因此每个环上节点都至少出现在一条报告的路径中。
    fn analyze_cycles(
        &self,
        declarations: &[FgNodeDeclaration],
        describe: &impl Fn(ResourceId) -> String,
    ) -> (Vec<FgCycleReport>, Vec<NodeId>) {
        let node_count = self.node_count();
        let mut scc_of = vec![usize::MAX; node_count];
        let mut on_cycle = vec![false; node_count];

        for (scc_idx, scc) in tarjan_scc(&self.graph).into_iter().enumerate() {
            if scc.len() < 2 {
                continue;
            }
            for node in scc {
                scc_of[node.index()] = scc_idx;
                on_cycle[node.index()] = true;
            }
        }

        let mut reports = Vec::new();
        let mut covered = vec![false; node_count];

        for &(node, resource) in &self.self_loops {
            on_cycle[node.index()] = true;
            reports.push(self.make_report(vec![node.index(), node.index()], vec![resource], declarations, describe));
        }

        for start in 0..node_count {
            if scc_of[start] == usize::MAX || covered[start] {
                continue;
            }
            let Some(path) = self.shortest_cycle_through(start, |n| scc_of[n] == scc_of[start]) else {
                continue;
            };
            for &n in &path {
                covered[n] = true;
            }
            let resources = path
                .iter()
                .tuple_windows()
                .map(|(&a, &b)| {
                    self.graph
                        .find_edge(NodeIndex::new(a), NodeIndex::new(b))
                        .and_then(|e| self.graph[e].resources.first().copied())
                        .unwrap_or(ResourceId::INVALID)
                })
                .collect();
            reports.push(self.make_report(path, resources, declarations, describe));
        }

        let cycle_nodes = (0..node_count).filter(|&i| on_cycle[i]).map(NodeId::new).collect();
        (reports, cycle_nodes)
    }

    /// BFS 找经过 `start` 的最短环，只在 `in_scc` 内搜索
    fn shortest_cycle_through(&self, start: usize, in_scc: impl Fn(usize) -> bool) -> Option<Vec<usize>> {
        let mut parent: Vec<Option<usize>> = vec![None; self.node_count()];
        let mut visited = vec![false; self.node_count()];
        let mut queue = VecDeque::from([start]);
        visited[start] = true;

        while let Some(current) = queue.pop_front() {
            for succ in self.sorted_successors(current) {
                if succ == start {
                    let mut path = vec![current];
                    let mut cursor = current;
                    while let Some(prev) = parent[cursor] {
                        path.push(prev);
                        cursor = prev;
                    }
                    path.reverse();
                    path.push(start);
                    return Some(path);
                }
                if !visited[succ] && in_scc(succ) {
                    visited[succ] = true;
                    parent[succ] = Some(current);
                    queue.push_back(succ);
                }
            }
        }
        None
    }

    fn make_report(
        &self,
        path: Vec<usize>,
        resources: Vec<ResourceId>,
        declarations: &[FgNodeDeclaration],
        describe: &impl Fn(ResourceId) -> String,
    ) -> FgCycleReport {
        let name = |n: usize| declarations.get(n).map(|d| d.name.as_str()).unwrap_or("<unknown>");
        let mut suggestions = Vec::new();

        for (hop, resource) in resources.iter().enumerate() {
            let (from, to) = (path[hop], path[hop + 1]);
            if from == to {
                suggestions.push(format!(
                    "split resource {} into separate input and output resources for node `{}`, or declare it ReadWrite",
                    describe(*resource),
                    name(from)
                ));
            } else {
                suggestions.push(format!(
                    "split resource {} into two buffers/images so `{}` does not wait on `{}`",
                    describe(*resource),
                    name(to),
                    name(from)
                ));
            }
        }

        // 闭合边：path 的最后一跳
        if path.len() > 2
            && let (Some(&back_from), Some(&back_to)) = (path.get(path.len() - 2), path.last())
        {
            suggestions.push(format!(
                "reorder node `{}` so it no longer consumes the output of `{}` in the same frame",
                name(back_to),
                name(back_from)
            ));
        }

        FgCycleReport {
            nodes: path.into_iter().map(NodeId::new).collect(),
            resources,
            suggestions,
        }
    }
}
