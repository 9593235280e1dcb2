//! The network facade: build, match, and the recognize-act driver
//!
//! The `Network` owns every arena (discrimination nodes, alpha memories,
//! joins, beta memories, production nodes, tokens), the working and
//! production memories, the agenda, and the evaluator. Rules compile into
//! the network right to left along their LHS; facts flow left to right
//! from the root through the discrimination tree into alpha memories and
//! across the joins. RHS actions call back into the facade, so a firing
//! rule's assertions and retractions are matched incrementally within the
//! same recognize-act cycle.

use crate::agenda::{Agenda, AgendaItem, StrategyKind};
use crate::memory::{ProductionMemory, WorkingMemory};
use crate::nodes::{
    AlphaKey, AlphaMemChild, AlphaMemId, AlphaMemory, AlphaNode, AlphaNodeId, BetaMemId,
    BetaMemory, JoinChild, JoinId, JoinNode, PNodeId, ProductionNode,
};
use crate::token::{TokenArena, TokenId};
use eval::{EvalMode, Evaluator};
use fact_model::{
    Action, EngineError, EngineResult, Fact, FactTemplate, Pattern, Rule, TestCall, Value,
    VarScope,
};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, trace, warn};

type Bindings = FxHashMap<String, Value>;
type Assignments = FxHashMap<String, u64>;

/// Variable bindings from the smaller map must agree with the larger one
/// wherever the names overlap.
fn bindings_compatible(a: &Bindings, b: &Bindings) -> bool {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small.iter().all(|(name, value)| match large.get(name) {
        Some(other) => value == other,
        None => true,
    })
}

/// A complete Rete network with its agenda and driver state.
pub struct Network {
    evaluator: Evaluator,
    working_memory: WorkingMemory,
    production_memory: ProductionMemory,

    /// Root dispatch: fact head symbol to depth-0 discrimination node.
    root_children: FxHashMap<String, AlphaNodeId>,
    alpha_nodes: Vec<AlphaNode>,
    alpha_memories: Vec<AlphaMemory>,
    join_nodes: Vec<JoinNode>,
    beta_memories: Vec<BetaMemory>,
    pnodes: Vec<ProductionNode>,
    tokens: TokenArena,

    agenda: Agenda,

    /// WME id to every token whose chain contains it.
    wme_tokens: FxHashMap<u64, FxHashSet<TokenId>>,
    /// WME id to the alpha memories holding it.
    wme_alpha_memories: FxHashMap<u64, Vec<AlphaMemId>>,
    /// Token to the beta memory storing it (complete-match tokens are
    /// held by no beta memory and have no entry).
    token_beta_memories: FxHashMap<TokenId, BetaMemId>,
    /// Pattern rendering to its alpha memory, shared across rules.
    alpha_memory_patterns: FxHashMap<String, AlphaMemId>,

    fired_activations: u64,
    out: Box<dyn Write>,
}

impl Network {
    /// Network around an evaluator (carrying any defglobal bindings) and
    /// an initial conflict-resolution strategy.
    pub fn new(evaluator: Evaluator, strategy: StrategyKind) -> Self {
        Self {
            evaluator,
            working_memory: WorkingMemory::new(),
            production_memory: ProductionMemory::new(),
            root_children: FxHashMap::default(),
            alpha_nodes: Vec::new(),
            alpha_memories: Vec::new(),
            join_nodes: Vec::new(),
            beta_memories: Vec::new(),
            pnodes: Vec::new(),
            tokens: TokenArena::new(),
            agenda: Agenda::new(strategy),
            wme_tokens: FxHashMap::default(),
            wme_alpha_memories: FxHashMap::default(),
            token_beta_memories: FxHashMap::default(),
            alpha_memory_patterns: FxHashMap::default(),
            fired_activations: 0,
            out: Box::new(std::io::stdout()),
        }
    }

    /// Network with a fresh evaluator and the depth strategy.
    pub fn with_defaults() -> Self {
        Self::new(Evaluator::new(), StrategyKind::Depth)
    }

    /// Redirect `printout` output (stdout by default).
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    /// The working memory.
    pub fn working_memory(&self) -> &WorkingMemory {
        &self.working_memory
    }

    /// The production memory.
    pub fn production_memory(&self) -> &ProductionMemory {
        &self.production_memory
    }

    /// The agenda.
    pub fn agenda(&self) -> &Agenda {
        &self.agenda
    }

    /// The evaluator and its environment.
    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Mutable access to the evaluator (defglobal definitions, etc.).
    pub fn evaluator_mut(&mut self) -> &mut Evaluator {
        &mut self.evaluator
    }

    /// Activations executed by the last recognize-act cycle.
    pub fn fired_activations(&self) -> u64 {
        self.fired_activations
    }

    /// Switch the agenda's conflict-resolution strategy.
    pub fn change_strategy(&mut self, strategy: StrategyKind) -> bool {
        self.agenda.change_strategy(strategy)
    }

    /// Drop all facts, rules, network nodes, and pending activations.
    ///
    /// The strategy kind survives; the evaluator's environment is kept.
    pub fn reset(&mut self) {
        debug!("resetting network");
        self.working_memory = WorkingMemory::new();
        self.production_memory = ProductionMemory::new();
        self.root_children.clear();
        self.alpha_nodes.clear();
        self.alpha_memories.clear();
        self.join_nodes.clear();
        self.beta_memories.clear();
        self.pnodes.clear();
        self.tokens.clear();
        self.agenda = Agenda::new(self.agenda.strategy());
        self.wme_tokens.clear();
        self.wme_alpha_memories.clear();
        self.token_beta_memories.clear();
        self.alpha_memory_patterns.clear();
        self.fired_activations = 0;
    }

    // ── Rule compilation ─────────────────────────────────────────────────

    /// Compile a rule into the network.
    ///
    /// Each LHS pattern gets (or shares) an alpha memory; the beta spine is
    /// then built right to left and terminates in the rule's production
    /// node. Same-named rules replace silently in production memory, but
    /// the network keeps matching with the newest compilation only going
    /// forward.
    pub fn add_rule(&mut self, rule: Rule) -> EngineResult<()> {
        debug!(rule = %rule.name, salience = rule.salience, "adding rule");
        self.production_memory.add_rule(rule.clone());

        for ce in &rule.lhs {
            let memory = self.build_alpha(&ce.pattern);
            self.alpha_memory_patterns
                .insert(ce.pattern.to_string(), memory);
        }

        let pnode = PNodeId(self.pnodes.len());
        self.pnodes.push(ProductionNode {
            name: rule.name.clone(),
            salience: rule.salience,
            complexity: rule.complexity,
            actions: Arc::new(rule.rhs.clone()),
            tests: Vec::new(),
            assigned_var: None,
        });
        self.build_beta(pnode, &rule)
    }

    /// Build (or share) the discrimination path for a pattern, returning
    /// its terminal alpha memory.
    fn build_alpha(&mut self, pattern: &Pattern) -> AlphaMemId {
        let head_id = match self.root_children.get(&pattern.head) {
            Some(&id) => id,
            None => {
                let id = AlphaNodeId(self.alpha_nodes.len());
                self.alpha_nodes.push(AlphaNode::new(
                    AlphaKey::Const(Value::symbol(pattern.head.clone())),
                    0,
                ));
                self.root_children.insert(pattern.head.clone(), id);
                id
            }
        };

        let mut var_refs: FxHashMap<String, SmallVec<[usize; 2]>> = FxHashMap::default();
        let mut current = head_id;
        loop {
            let (depth, label) = {
                let node = &self.alpha_nodes[current.0];
                (node.depth, node.label.clone())
            };

            // A repeated variable pins this node to the previous
            // occurrence's position for the intra-fact consistency check.
            if let Some(name) = label.var_name() {
                if let Some(positions) = var_refs.get(name) {
                    self.alpha_nodes[current.0].to_check = positions.last().copied();
                }
                var_refs.entry(name.to_string()).or_default().push(depth - 1);
            }

            if depth < pattern.fields.len() {
                let key = AlphaKey::for_field(&pattern.fields[depth]);
                current = match self.alpha_nodes[current.0].children.get(&key) {
                    Some(&child) => child,
                    None => {
                        let child = AlphaNodeId(self.alpha_nodes.len());
                        self.alpha_nodes.push(AlphaNode::new(key.clone(), depth + 1));
                        let is_var = matches!(key, AlphaKey::Var(_));
                        let parent = &mut self.alpha_nodes[current.0];
                        parent.children.insert(key, child);
                        if is_var {
                            parent.var_children.push(child);
                        }
                        child
                    }
                };
            } else {
                let memory = match self.alpha_nodes[current.0].memory {
                    Some(memory) => memory,
                    None => {
                        let memory = AlphaMemId(self.alpha_memories.len());
                        self.alpha_memories.push(AlphaMemory::default());
                        self.alpha_nodes[current.0].memory = Some(memory);
                        memory
                    }
                };
                self.alpha_memories[memory.0].variables = var_refs;
                return memory;
            }
        }
    }

    fn lookup_alpha(&self, pattern: &Pattern) -> EngineResult<AlphaMemId> {
        self.alpha_memory_patterns
            .get(&pattern.to_string())
            .copied()
            .ok_or_else(|| {
                EngineError::Evaluate(format!("no alpha memory for the pattern {pattern}"))
            })
    }

    /// Build the beta spine for a rule, right to left along its LHS.
    fn build_beta(&mut self, pnode: PNodeId, rule: &Rule) -> EngineResult<()> {
        let mut tests_by_var = rule.tests_by_var.clone();
        let count = rule.lhs.len();
        if count == 0 {
            return Err(EngineError::Evaluate(format!(
                "the rule \"{}\" has an empty left-hand side",
                rule.name
            )));
        }

        if count == 1 {
            let ce = &rule.lhs[0];
            let memory = self.lookup_alpha(&ce.pattern)?;
            self.pnodes[pnode.0].assigned_var = ce.binding.clone();
            self.alpha_memories[memory.0]
                .children
                .push(AlphaMemChild::Production(pnode));
            let tests = self.claim_tests(memory, true, &mut tests_by_var, &rule.tests)?;
            self.pnodes[pnode.0].tests = tests;
            return Ok(());
        }

        let mut downstream = JoinChild::Production(pnode);
        for position in (1..count).rev() {
            let ce = &rule.lhs[position];
            let memory = self.lookup_alpha(&ce.pattern)?;
            let join = JoinId(self.join_nodes.len());
            let mut node = JoinNode::new(memory);
            node.assigned_var = ce.binding.clone();
            node.children.push(downstream);
            self.join_nodes.push(node);

            let tests = self.claim_tests(memory, false, &mut tests_by_var, &rule.tests)?;
            self.join_nodes[join.0].tests = tests;
            self.alpha_memories[memory.0]
                .children
                .push(AlphaMemChild::Join(join));

            let beta = BetaMemId(self.beta_memories.len());
            let mut beta_memory = BetaMemory::default();
            beta_memory.children.push(join);
            self.beta_memories.push(beta_memory);
            self.join_nodes[join.0].parent = Some(beta);
            downstream = JoinChild::Memory(beta);
        }

        // First pattern: the dummy join has no left input.
        let ce = &rule.lhs[0];
        let memory = self.lookup_alpha(&ce.pattern)?;
        let dummy = JoinId(self.join_nodes.len());
        let mut node = JoinNode::new(memory);
        node.assigned_var = ce.binding.clone();
        node.children.push(downstream);
        self.join_nodes.push(node);

        let tests = self.claim_tests(memory, true, &mut tests_by_var, &rule.tests)?;
        self.join_nodes[dummy.0].tests = tests;
        self.alpha_memories[memory.0]
            .children
            .push(AlphaMemChild::Join(dummy));
        Ok(())
    }

    /// Claim for one node every pending test whose variables are covered
    /// by this alpha memory's variables plus the globals.
    ///
    /// The beta build runs right to left, so a test lands on the join of
    /// the rightmost pattern mentioning any of its variables, which is the
    /// earliest point in data flow where they are all bound. At the last
    /// (leftmost) node, leftover tests reference variables no pattern
    /// binds.
    fn claim_tests(
        &mut self,
        memory: AlphaMemId,
        is_last: bool,
        tests_by_var: &mut FxHashMap<String, FxHashSet<usize>>,
        tests: &[TestCall],
    ) -> EngineResult<Vec<TestCall>> {
        let mut claimed: FxHashSet<usize> = FxHashSet::default();
        let names: Vec<String> = self.alpha_memories[memory.0]
            .variables
            .keys()
            .cloned()
            .chain(self.evaluator.env().global_names().cloned())
            .collect();
        for name in names {
            if let Some(indices) = tests_by_var.remove(&name) {
                claimed.extend(indices);
            }
        }
        for indices in tests_by_var.values_mut() {
            indices.retain(|index| !claimed.contains(index));
        }
        if is_last {
            tests_by_var.retain(|_, indices| !indices.is_empty());
            if !tests_by_var.is_empty() {
                return Err(EngineError::Evaluate(
                    "there are tests with invalid variables".into(),
                ));
            }
        }
        let mut ordered: Vec<usize> = claimed.into_iter().collect();
        ordered.sort_unstable();
        Ok(ordered.into_iter().map(|index| tests[index].clone()).collect())
    }

    // ── Fact flow ────────────────────────────────────────────────────────

    /// Assert a fact: add to working memory and match from the root.
    ///
    /// Returns the new WME id, or `None` when the fact was a structural
    /// duplicate (which is not an error and propagates nothing).
    pub fn assert_fact(&mut self, fact: Fact) -> EngineResult<Option<u64>> {
        let added = self.working_memory.add_fact(fact)?.map(|wme| wme.id);
        match added {
            Some(id) => {
                debug!(id, "asserting fact");
                self.alpha_match(id)?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Retract a fact by id.
    ///
    /// Every token containing the WME loses its queued activations and its
    /// beta-memory residence; every alpha memory holding the WME drops it;
    /// finally the WME leaves working memory. Returns whether a removal
    /// happened.
    pub fn retract_fact(&mut self, id: u64) -> bool {
        if !self.working_memory.contains(id) {
            return false;
        }
        debug!(id, "retracting fact");

        if let Some(tokens) = self.wme_tokens.remove(&id) {
            for token in tokens {
                self.agenda.del_activation(token);
                if let Some(beta) = self.token_beta_memories.remove(&token) {
                    self.beta_memories[beta.0].remove_token(token);
                }
            }
        }
        if let Some(memories) = self.wme_alpha_memories.remove(&id) {
            for memory in memories {
                let m = &mut self.alpha_memories[memory.0];
                m.wmes.shift_remove(&id);
                m.wme_bindings.remove(&id);
            }
        }
        self.working_memory.remove_fact(id)
    }

    /// Match a newly asserted WME through the discrimination tree, then
    /// activate every terminal memory the fact reaches.
    fn alpha_match(&mut self, wme_id: u64) -> EngineResult<()> {
        let Some(wme) = self.working_memory.get(wme_id) else {
            return Ok(());
        };
        let fact = wme.fact.clone();
        let Some(&head) = self.root_children.get(&fact.head) else {
            return Ok(());
        };
        let mut terminals = Vec::new();
        self.alpha_collect(head, &fact, &mut terminals);
        for memory in terminals {
            self.activate_alpha_memory(memory, wme_id, &fact)?;
        }
        Ok(())
    }

    fn alpha_collect(&self, node: AlphaNodeId, fact: &Fact, out: &mut Vec<AlphaMemId>) {
        let n = &self.alpha_nodes[node.0];
        if let Some(previous) = n.to_check {
            // Same variable twice in the pattern: both fields must agree.
            if fact.values[previous] != fact.values[n.depth - 1] {
                return;
            }
        }
        if n.depth < fact.values.len() {
            let key = AlphaKey::Const(fact.values[n.depth].clone());
            if let Some(&child) = n.children.get(&key) {
                self.alpha_collect(child, fact, out);
            }
            for &child in &n.var_children {
                self.alpha_collect(child, fact, out);
            }
        } else if let Some(memory) = n.memory {
            out.push(memory);
        }
    }

    fn activate_alpha_memory(
        &mut self,
        memory: AlphaMemId,
        wme_id: u64,
        fact: &Fact,
    ) -> EngineResult<()> {
        let bindings: Bindings = {
            let m = &mut self.alpha_memories[memory.0];
            m.wmes.insert(wme_id);
            let bindings: Bindings = m
                .variables
                .iter()
                .map(|(name, positions)| (name.clone(), fact.values[positions[0]].clone()))
                .collect();
            m.wme_bindings.insert(wme_id, bindings.clone());
            bindings
        };
        self.wme_alpha_memories.entry(wme_id).or_default().push(memory);
        trace!(wme = wme_id, ?memory, "alpha memory activated");

        let children = self.alpha_memories[memory.0].children.clone();
        for child in children {
            match child {
                AlphaMemChild::Join(join) => self.right_activate(join, wme_id)?,
                AlphaMemChild::Production(pnode) => {
                    // Single-pattern rule: the alpha memory feeds the
                    // production node directly.
                    let token = self.tokens.alloc(None, wme_id);
                    self.activate_pnode(token, pnode, bindings.clone(), Assignments::default())?;
                }
            }
        }
        Ok(())
    }

    // ── Join activations ─────────────────────────────────────────────────

    fn right_activate(&mut self, join: JoinId, wme_id: u64) -> EngineResult<()> {
        match self.join_nodes[join.0].parent {
            Some(parent) => self.join_right(join, parent, wme_id),
            None => self.dummy_right(join, wme_id),
        }
    }

    /// Right activation: a new WME joins against every stored token.
    fn join_right(&mut self, join: JoinId, parent: BetaMemId, wme_id: u64) -> EngineResult<()> {
        let (alpha, tests, assigned, children) = {
            let j = &self.join_nodes[join.0];
            (j.alpha, j.tests.clone(), j.assigned_var.clone(), j.children.clone())
        };
        let Some(alpha_vars) = self.alpha_memories[alpha.0].wme_bindings.get(&wme_id).cloned()
        else {
            return Ok(());
        };

        let stored: Vec<TokenId> = self.beta_memories[parent.0].tokens.iter().copied().collect();
        for token in stored {
            let Some(beta_vars) = self.beta_memories[parent.0].token_bindings.get(&token) else {
                continue;
            };
            if !bindings_compatible(&alpha_vars, beta_vars) {
                continue;
            }
            let mut merged = beta_vars.clone();
            for (name, value) in &alpha_vars {
                merged.insert(name.clone(), value.clone());
            }
            if !self.eval_tests(&tests, &merged)? {
                continue;
            }
            let mut assignments = self.beta_memories[parent.0]
                .token_assignments
                .get(&token)
                .cloned()
                .unwrap_or_default();
            if let Some(var) = &assigned {
                assignments.insert(var.clone(), wme_id);
            }
            let extended = self.tokens.alloc(Some(token), wme_id);
            for child in &children {
                self.propagate(*child, extended, &merged, &assignments)?;
            }
        }
        Ok(())
    }

    /// Left activation: a new token joins against every stored WME.
    fn left_activate(
        &mut self,
        join: JoinId,
        token: TokenId,
        assignments: &Assignments,
    ) -> EngineResult<()> {
        let (parent, alpha, tests, assigned, children) = {
            let j = &self.join_nodes[join.0];
            let Some(parent) = j.parent else {
                return Ok(());
            };
            (parent, j.alpha, j.tests.clone(), j.assigned_var.clone(), j.children.clone())
        };
        let Some(beta_vars) = self.beta_memories[parent.0].token_bindings.get(&token).cloned()
        else {
            return Ok(());
        };

        let stored: Vec<u64> = self.alpha_memories[alpha.0].wmes.iter().copied().collect();
        for wme_id in stored {
            let Some(alpha_vars) = self.alpha_memories[alpha.0].wme_bindings.get(&wme_id) else {
                continue;
            };
            if !bindings_compatible(alpha_vars, &beta_vars) {
                continue;
            }
            let mut merged = beta_vars.clone();
            for (name, value) in alpha_vars {
                merged.insert(name.clone(), value.clone());
            }
            if !self.eval_tests(&tests, &merged)? {
                continue;
            }
            let mut assignments = assignments.clone();
            if let Some(var) = &assigned {
                assignments.insert(var.clone(), wme_id);
            }
            let extended = self.tokens.alloc(Some(token), wme_id);
            for child in &children {
                self.propagate(*child, extended, &merged, &assignments)?;
            }
        }
        Ok(())
    }

    /// Right activation of a dummy join: no left side, the WME alone forms
    /// a token.
    fn dummy_right(&mut self, join: JoinId, wme_id: u64) -> EngineResult<()> {
        let (alpha, tests, assigned, children) = {
            let j = &self.join_nodes[join.0];
            (j.alpha, j.tests.clone(), j.assigned_var.clone(), j.children.clone())
        };
        let Some(alpha_vars) = self.alpha_memories[alpha.0].wme_bindings.get(&wme_id).cloned()
        else {
            return Ok(());
        };
        let mut assignments = Assignments::default();
        if let Some(var) = assigned {
            assignments.insert(var, wme_id);
        }
        if !self.eval_tests(&tests, &alpha_vars)? {
            return Ok(());
        }
        let token = self.tokens.alloc(None, wme_id);
        for child in &children {
            self.propagate(*child, token, &alpha_vars, &assignments)?;
        }
        Ok(())
    }

    fn propagate(
        &mut self,
        child: JoinChild,
        token: TokenId,
        vars: &Bindings,
        assignments: &Assignments,
    ) -> EngineResult<()> {
        match child {
            JoinChild::Memory(beta) => {
                self.insert_beta_token(beta, token, vars.clone(), assignments.clone())
            }
            JoinChild::Production(pnode) => {
                self.activate_pnode(token, pnode, vars.clone(), assignments.clone())
            }
        }
    }

    fn insert_beta_token(
        &mut self,
        beta: BetaMemId,
        token: TokenId,
        vars: Bindings,
        assignments: Assignments,
    ) -> EngineResult<()> {
        self.token_beta_memories.insert(token, beta);
        {
            let m = &mut self.beta_memories[beta.0];
            m.tokens.insert(token);
            m.token_bindings.insert(token, vars);
            m.token_assignments.insert(token, assignments.clone());
        }
        let ids = self.tokens.wme_ids(token);
        for &id in ids {
            self.wme_tokens.entry(id).or_default().insert(token);
        }

        let children = self.beta_memories[beta.0].children.clone();
        for join in children {
            self.left_activate(join, token, &assignments)?;
        }
        Ok(())
    }

    /// A token reached a production node: run the node's local tests and
    /// queue the activation.
    fn activate_pnode(
        &mut self,
        token: TokenId,
        pnode: PNodeId,
        vars: Bindings,
        mut assignments: Assignments,
    ) -> EngineResult<()> {
        let (name, salience, complexity, actions, tests, assigned) = {
            let p = &self.pnodes[pnode.0];
            (
                p.name.clone(),
                p.salience,
                p.complexity,
                Arc::clone(&p.actions),
                p.tests.clone(),
                p.assigned_var.clone(),
            )
        };
        if !self.eval_tests(&tests, &vars)? {
            return Ok(());
        }

        let wme_ids: SmallVec<[u64; 4]> = SmallVec::from_slice(self.tokens.wme_ids(token));
        for &id in &wme_ids {
            self.wme_tokens.entry(id).or_default().insert(token);
        }
        if let Some(var) = assigned {
            assignments.insert(var, self.tokens.wme(token));
        }

        trace!(rule = %name, ?token, "activation queued");
        self.agenda.add_activation(AgendaItem {
            rule_name: name,
            salience,
            complexity,
            actions,
            token,
            bindings: vars,
            assignments,
            wme_ids,
        });
        Ok(())
    }

    fn eval_tests(&mut self, tests: &[TestCall], vars: &Bindings) -> EngineResult<bool> {
        for test in tests {
            if !self.evaluator.eval_test(test, vars)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ── Recognize-act ────────────────────────────────────────────────────

    /// Run the recognize-act cycle until the agenda is exhausted or the
    /// firing limit is reached. Returns the number of activations fired.
    ///
    /// Actions mutate working memory through this network, so assertions
    /// made by one firing are matched and can activate rules fired later
    /// in the same cycle. An action error aborts the cycle.
    pub fn recognize_act_cycle(&mut self, limit: Option<u64>) -> EngineResult<u64> {
        self.fired_activations = 0;
        while let Some(item) = self.agenda.get_next_activation() {
            self.fire(&item)?;
            self.fired_activations += 1;
            if limit.is_some_and(|l| self.fired_activations >= l) {
                break;
            }
        }
        Ok(self.fired_activations)
    }

    fn fire(&mut self, item: &AgendaItem) -> EngineResult<()> {
        debug!(rule = %item.rule_name, salience = item.salience, "firing activation");
        let mut locals = item.bindings.clone();
        for (name, id) in &item.assignments {
            locals.insert(name.clone(), Value::Int(*id as i64));
        }
        self.evaluator.env_mut().set_locals(locals);
        let actions = Arc::clone(&item.actions);
        for action in actions.iter() {
            self.run_action(action)?;
        }
        Ok(())
    }

    fn run_action(&mut self, action: &Action) -> EngineResult<()> {
        match action {
            Action::Assert(templates) => {
                for template in templates {
                    let fact = self.materialize(template)?;
                    self.assert_fact(fact)?;
                }
                Ok(())
            }
            Action::Retract(exprs) => {
                for expr in exprs {
                    let value = self.evaluator.evaluate(expr, EvalMode::Rhs)?;
                    match value.resolved() {
                        Some(Value::Int(id)) if *id >= 1 => {
                            self.retract_fact(*id as u64);
                        }
                        _ => {
                            return Err(EngineError::Evaluate(
                                "\"retract\" requires fact indexes".into(),
                            ))
                        }
                    }
                }
                Ok(())
            }
            Action::Bind { var, value } => {
                let evaluated = self.evaluator.evaluate(value, EvalMode::Rhs)?;
                let content = match evaluated.resolved() {
                    Some(inner) => inner.clone(),
                    None => evaluated,
                };
                match var.scope {
                    VarScope::Global => {
                        self.evaluator.env_mut().set_global(var.name.clone(), content)
                    }
                    VarScope::Local | VarScope::Assigned => {
                        self.evaluator.env_mut().set_local(var.name.clone(), content)
                    }
                }
                Ok(())
            }
            Action::Printout(exprs) => {
                for expr in exprs {
                    let value = self.evaluator.evaluate(expr, EvalMode::Rhs)?;
                    let content = match value.resolved() {
                        Some(inner) => inner.clone(),
                        None => value,
                    };
                    // Strings print their content, not their quoted form.
                    match content {
                        Value::Str(s) => write!(self.out, "{s} ")?,
                        other => write!(self.out, "{other} ")?,
                    }
                }
                writeln!(self.out)?;
                self.out.flush()?;
                Ok(())
            }
            Action::Test(expr) => {
                let value = self.evaluator.evaluate(expr, EvalMode::Rhs)?;
                match value.resolved() {
                    Some(Value::Bool(_)) => Ok(()),
                    _ => Err(EngineError::Evaluate(
                        "the \"test\" predicate takes only boolean arguments".into(),
                    )),
                }
            }
            Action::Strategy(name) => {
                match StrategyKind::parse(name) {
                    Some(kind) => {
                        self.agenda.change_strategy(kind);
                    }
                    None => warn!(strategy = %name, "unknown strategy"),
                }
                Ok(())
            }
        }
    }

    fn materialize(&mut self, template: &FactTemplate) -> EngineResult<Fact> {
        let mut values = Vec::with_capacity(template.fields.len());
        for field in &template.fields {
            values.push(self.evaluator.evaluate(field, EvalMode::Rhs)?);
        }
        Ok(Fact::new(template.head.clone(), values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fact_model::PatternCe;

    fn rule(name: &str, patterns: Vec<PatternCe>) -> Rule {
        Rule {
            name: name.into(),
            salience: 0,
            lhs: patterns,
            rhs: vec![],
            tests: vec![],
            tests_by_var: FxHashMap::default(),
            complexity: 0,
        }
    }

    fn ce(head: &str, fields: Vec<Value>) -> PatternCe {
        PatternCe {
            binding: None,
            pattern: Pattern::new(head, fields),
        }
    }

    #[test]
    fn test_equal_patterns_share_one_alpha_memory() {
        let mut net = Network::with_defaults();
        let first = net.build_alpha(&Pattern::new("a", vec![Value::local("x")]));
        let second = net.build_alpha(&Pattern::new("a", vec![Value::local("x")]));
        assert_eq!(first, second);
        assert_eq!(net.alpha_memories.len(), 1);
    }

    #[test]
    fn test_distinct_variable_names_split_the_tree() {
        let mut net = Network::with_defaults();
        let first = net.build_alpha(&Pattern::new("a", vec![Value::local("x")]));
        let second = net.build_alpha(&Pattern::new("a", vec![Value::local("y")]));
        assert_ne!(first, second);
    }

    #[test]
    fn test_alpha_memory_records_variable_positions() {
        let mut net = Network::with_defaults();
        let memory = net.build_alpha(&Pattern::new(
            "triple",
            vec![Value::local("x"), Value::Int(2), Value::local("x")],
        ));
        let variables = &net.alpha_memories[memory.0].variables;
        assert_eq!(variables["x"].as_slice(), &[0, 2]);
    }

    #[test]
    fn test_repeated_variable_enforces_intra_fact_consistency() {
        let mut net = Network::with_defaults();
        let memory = net.build_alpha(&Pattern::new(
            "pair",
            vec![Value::local("x"), Value::local("x")],
        ));

        net.assert_fact(Fact::new("pair", vec![Value::Int(1), Value::Int(1)]))
            .unwrap();
        net.assert_fact(Fact::new("pair", vec![Value::Int(1), Value::Int(2)]))
            .unwrap();

        let wmes: Vec<u64> = net.alpha_memories[memory.0].wmes.iter().copied().collect();
        assert_eq!(wmes, vec![1]);
    }

    #[test]
    fn test_constant_fields_discriminate() {
        let mut net = Network::with_defaults();
        let memory = net.build_alpha(&Pattern::new("a", vec![Value::Int(5)]));

        net.assert_fact(Fact::new("a", vec![Value::Int(5)])).unwrap();
        net.assert_fact(Fact::new("a", vec![Value::Int(6)])).unwrap();
        net.assert_fact(Fact::new("b", vec![Value::Int(5)])).unwrap();

        let wmes: Vec<u64> = net.alpha_memories[memory.0].wmes.iter().copied().collect();
        assert_eq!(wmes, vec![1]);
    }

    #[test]
    fn test_single_pattern_rule_links_pnode_to_alpha_memory() {
        let mut net = Network::with_defaults();
        net.add_rule(rule("r", vec![ce("a", vec![Value::local("x")])]))
            .unwrap();
        assert!(net.join_nodes.is_empty());
        assert_eq!(net.pnodes.len(), 1);

        net.assert_fact(Fact::new("a", vec![Value::Int(1)])).unwrap();
        assert_eq!(net.agenda().activations().len(), 1);
    }

    #[test]
    fn test_two_pattern_rule_builds_dummy_join_and_join() {
        let mut net = Network::with_defaults();
        net.add_rule(rule(
            "r",
            vec![
                ce("p", vec![Value::local("x")]),
                ce("q", vec![Value::local("x")]),
            ],
        ))
        .unwrap();
        assert_eq!(net.join_nodes.len(), 2);
        assert_eq!(net.beta_memories.len(), 1);
        let dummies = net.join_nodes.iter().filter(|j| j.parent.is_none()).count();
        assert_eq!(dummies, 1);
    }

    #[test]
    fn test_test_with_unbound_variable_is_rejected() {
        let mut net = Network::with_defaults();
        let test = TestCall::new(fact_model::FunctionCall::new(
            ">",
            vec![
                fact_model::Expr::lit(Value::local("z")),
                fact_model::Expr::lit(Value::Int(0)),
            ],
        ));
        let mut tests_by_var = FxHashMap::default();
        tests_by_var.insert("z".to_string(), FxHashSet::from_iter([0usize]));
        let bad = Rule {
            name: "bad".into(),
            salience: 0,
            lhs: vec![ce("a", vec![Value::local("x")])],
            rhs: vec![],
            tests: vec![test],
            tests_by_var,
            complexity: 0,
        };
        assert!(net.add_rule(bad).is_err());
    }

    #[test]
    fn test_retract_scrubs_alpha_memories_and_agenda() {
        let mut net = Network::with_defaults();
        net.add_rule(rule("r", vec![ce("a", vec![Value::local("x")])]))
            .unwrap();
        let id = net
            .assert_fact(Fact::new("a", vec![Value::Int(1)]))
            .unwrap()
            .unwrap();
        assert_eq!(net.agenda().activations().len(), 1);

        assert!(net.retract_fact(id));
        assert!(net.agenda().activations().is_empty());
        assert!(net.alpha_memories.iter().all(|m| m.wmes.is_empty()));
        assert!(!net.retract_fact(id));
    }

    #[test]
    fn test_duplicate_assertion_returns_none_and_propagates_once() {
        let mut net = Network::with_defaults();
        net.add_rule(rule("r", vec![ce("a", vec![Value::local("x")])]))
            .unwrap();
        assert!(net
            .assert_fact(Fact::new("a", vec![Value::Int(1)]))
            .unwrap()
            .is_some());
        assert!(net
            .assert_fact(Fact::new("a", vec![Value::Int(1)]))
            .unwrap()
            .is_none());
        assert_eq!(net.agenda().activations().len(), 1);
    }

    #[test]
    fn test_reset_preserves_the_strategy() {
        let mut net = Network::with_defaults();
        net.change_strategy(StrategyKind::Breadth);
        net.assert_fact(Fact::new("a", vec![])).unwrap();
        net.reset();
        assert!(net.working_memory().is_empty());
        assert_eq!(net.agenda().strategy(), StrategyKind::Breadth);
    }
}
