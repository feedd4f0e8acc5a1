//! 对局同步状态机
//!
//! 每个 [`Game`] 独占一棵着法树、一个待确认走法队列和一个预走棋队列。
//! 所有输入（服务器局面、用户走子、请求）都通过 [`Game::dispatch`] 顺序处理，
//! 输出是发往服务器的命令（经 [`CommandSink`]）和给界面层的 [`Notification`]。
//!
//! 出现分歧时总是相信服务器，丢弃本地的投机状态。

mod pipeline;
mod premove;
mod role;

pub use pipeline::{BranchChoice, MoveOutcome};
pub use premove::{Premove, PremoveMode, PremoveQueue};
pub use role::{Role, RoleRequest};

use std::collections::VecDeque;
use std::sync::Arc;

use protocol::{Color, Fen, GameId, Move, PositionUpdate};
use serde::{Deserialize, Serialize};

use crate::error::GameError;
use crate::history::{Clocks, History, NodeId};
use crate::network::CommandSink;
use crate::oracle::{RulesOracle, ShakmatyOracle, VariantCategory};

/// 研究模式下新走法与已有后续不同时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EditPolicy {
    /// 询问用户
    Ask,
    /// 替换已有后续
    Overwrite,
    /// 作为新变着
    #[default]
    NewVariation,
}

/// 同步相关设置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub premove_enabled: bool,
    pub premove_mode: PremoveMode,
    pub edit_policy: EditPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            premove_enabled: true,
            premove_mode: PremoveMode::default(),
            edit_policy: EditPolicy::default(),
        }
    }
}

/// 所有对局共享的上下文
#[derive(Clone)]
pub struct GameContext {
    pub oracle: Arc<dyn RulesOracle>,
    pub settings: SyncSettings,
}

impl GameContext {
    pub fn new(oracle: Arc<dyn RulesOracle>, settings: SyncSettings) -> Self {
        Self { oracle, settings }
    }
}

impl Default for GameContext {
    fn default() -> Self {
        Self::new(Arc::new(ShakmatyOracle), SyncSettings::default())
    }
}

/// 已发送、等待服务器回显的走法
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMove {
    pub node: NodeId,
    /// 期望的回显局面
    pub fen: String,
    /// 节点是否由这次走子新建（失步时删除）
    pub created: bool,
}

/// 光标导航
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    First,
    Prev,
    Next,
    Last,
    To(NodeId),
}

/// 对局输入事件
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    /// 服务器局面更新
    Position(PositionUpdate),
    /// 对局创建
    Created {
        white: String,
        black: String,
        description: String,
    },
    /// 对局结束
    Ended { reason: String, result: String },
    ObservationStopped,
    ExaminationStopped,
    /// 用户走子
    UserMove(Move),
    /// 回答分支选择
    ChooseBranch(BranchChoice),
    /// 取消全部预走棋（右键、长按）
    CancelPremoves,
    /// 角色请求
    Request(RoleRequest),
    Navigate(Navigation),
    /// 删除节点（有待确认走法时延后）
    RemoveNode(NodeId),
    Promote(NodeId),
    MakeContinuation(NodeId),
    /// 连接断开
    Disconnected,
}

/// 给界面层的通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    NodeAdded { node: NodeId },
    NodesRemoved { nodes: Vec<NodeId> },
    NodePromoted { node: NodeId },
    /// 着法树被整体替换
    HistoryReset,
    CursorChanged { node: NodeId },
    RoleChanged { from: Role, to: Role },
    MoveRejected { mv: Move },
    PremoveQueued { mv: Move },
    PremovesCleared,
    /// 服务器回显与待确认走法不一致
    Desynchronized { expected: String, actual: String },
    /// 需要用户在覆盖与新变着之间选择
    BranchChoiceRequired { node: NodeId },
    GameEnded { result: String },
}

/// 等待用户选择的分支
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingBranch {
    /// 本地走子，尚未加入着法树
    Local { base: NodeId, mv: Move },
    /// 服务器走子，已作为变着加入
    Server { node: NodeId },
}

/// 一块棋盘的同步状态
pub struct Game {
    id: GameId,
    role: Role,
    local_side: Option<Color>,
    variant: VariantCategory,
    vs_computer: bool,
    history: History,
    pending: VecDeque<PendingMove>,
    restore_node: Option<NodeId>,
    premoves: PremoveQueue,
    remove_request: Option<NodeId>,
    pending_branch: Option<PendingBranch>,
    /// 服务器最后确认的节点
    server_node: NodeId,
    ctx: GameContext,
    notifications: Vec<Notification>,
}

impl Game {
    pub fn new(id: GameId, ctx: GameContext) -> Self {
        Self::with_history(id, History::default(), ctx)
    }

    /// 以已有着法树创建（如载入的棋谱）
    pub fn with_history(id: GameId, history: History, ctx: GameContext) -> Self {
        let server_node = history.root();
        let mut game = Self {
            id,
            role: Role::None,
            local_side: None,
            variant: VariantCategory::default(),
            vs_computer: false,
            history,
            pending: VecDeque::new(),
            restore_node: None,
            premoves: PremoveQueue::new(ctx.settings.premove_mode),
            remove_request: None,
            pending_branch: None,
            server_node,
            ctx,
            notifications: Vec::new(),
        };
        game.refresh_edit_mode();
        game
    }

    // === 访问 ===

    pub fn id(&self) -> GameId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn local_side(&self) -> Option<Color> {
        self.local_side
    }

    pub fn variant(&self) -> VariantCategory {
        self.variant
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn pending_moves(&self) -> &VecDeque<PendingMove> {
        &self.pending
    }

    pub fn restore_node(&self) -> Option<NodeId> {
        self.restore_node
    }

    pub fn premoves(&self) -> &PremoveQueue {
        &self.premoves
    }

    pub fn remove_request(&self) -> Option<NodeId> {
        self.remove_request
    }

    pub fn server_node(&self) -> NodeId {
        self.server_node
    }

    pub fn branch_choice_pending(&self) -> bool {
        self.pending_branch.is_some()
    }

    pub fn set_vs_computer(&mut self, vs_computer: bool) {
        self.vs_computer = vs_computer;
    }

    /// 取出积累的通知
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// 处理一个输入事件
    ///
    /// 只有用户走子与分支选择会返回走子结果。
    pub fn dispatch(
        &mut self,
        event: GameEvent,
        sink: &mut dyn CommandSink,
    ) -> Result<Option<MoveOutcome>, GameError> {
        match event {
            GameEvent::Position(update) => self.on_position(update, sink)?,
            GameEvent::Created {
                white,
                black,
                description,
            } => self.on_created(&white, &black, &description),
            GameEvent::Ended { reason, result } => self.on_ended(&reason, &result),
            GameEvent::ObservationStopped | GameEvent::ExaminationStopped => {
                self.set_role(Role::None, None)
            }
            GameEvent::UserMove(mv) => return self.user_move(mv, sink).map(Some),
            GameEvent::ChooseBranch(choice) => return self.choose_branch(choice, sink).map(Some),
            GameEvent::CancelPremoves => self.cancel_premoves(),
            GameEvent::Request(request) => self.request(&request, sink)?,
            GameEvent::Navigate(nav) => self.navigate(nav)?,
            GameEvent::RemoveNode(node) => {
                self.request_remove(node)?;
            }
            GameEvent::Promote(node) => {
                self.history.promote(node)?;
                self.notify(Notification::NodePromoted { node });
            }
            GameEvent::MakeContinuation(node) => {
                self.history.make_continuation(node)?;
                self.notify(Notification::NodePromoted { node });
            }
            GameEvent::Disconnected => self.on_disconnect(),
        }
        Ok(None)
    }

    /// 发出角色请求；当前角色不允许时本地拒绝，不联系服务器
    pub fn request(&mut self, request: &RoleRequest, sink: &mut dyn CommandSink) -> Result<(), GameError> {
        if !request.permitted_for(self.role) {
            tracing::warn!("Game {}: {:?} rejected while {:?}", self.id, request, self.role);
            return Err(GameError::RequestNotAllowed {
                request: format!("{:?}", request),
                role: self.role,
            });
        }
        sink.send_command(request.to_command(self.id));
        Ok(())
    }

    // === 服务器事件 ===

    fn on_created(&mut self, white: &str, black: &str, description: &str) {
        tracing::info!("Game {} created: {} vs. {} ({})", self.id, white, black, description);
        self.variant = VariantCategory::from_description(description);
        self.history.set_metatag("White", white);
        self.history.set_metatag("Black", black);
    }

    fn on_ended(&mut self, reason: &str, result: &str) {
        tracing::info!("Game {} ended: {} {}", self.id, reason, result);
        self.history.set_metatag("Result", result);
        self.history.set_metatag("Termination", reason);
        self.set_role(Role::None, None);
        self.notify(Notification::GameEnded {
            result: result.to_string(),
        });
    }

    fn on_disconnect(&mut self) {
        self.pending.clear();
        self.restore_node = None;
        self.pending_branch = None;
        self.clear_premoves();
    }

    fn on_position(&mut self, update: PositionUpdate, sink: &mut dyn CommandSink) -> Result<(), GameError> {
        tracing::debug!("Game {}: position {}", self.id, update.fen);
        let side_to_move = update.side_to_move().unwrap_or(Color::White);
        let (role, local) = Role::from_relation(update.relation, side_to_move, self.vs_computer);
        self.set_role(role, local);
        // 未回答的分支选择过时：本地走子作废，服务器走子保留为变着
        self.pending_branch = None;

        if self.history.is_scratch() && self.history.is_empty() {
            self.anchor(&update);
            return Ok(());
        }

        if let Some(head) = self.pending.front() {
            if Fen::same_position(&head.fen, &update.fen) {
                self.confirm(&update)?;
                return self.after_position(&update, sink);
            }
            let expected = head.fen.clone();
            tracing::warn!(
                "Game {}: server echo does not match pending move, resynchronizing",
                self.id
            );
            self.notify(Notification::Desynchronized {
                expected,
                actual: update.fen.clone(),
            });
            self.rollback()?;
        }

        self.apply_server_position(&update)?;
        self.after_position(&update, sink)
    }

    /// 第一份局面把空的本地着法树锚定到服务器
    fn anchor(&mut self, update: &PositionUpdate) {
        self.history.try_anchor(&update.fen);
        self.history.set_metatag("White", &update.white);
        self.history.set_metatag("Black", &update.black);
        let root = self.history.root();
        let _ = self.history.set_clocks(root, clocks_of(update));
        self.server_node = root;
        self.refresh_edit_mode();
        self.notify(Notification::HistoryReset);
        self.notify(Notification::CursorChanged { node: root });
    }

    /// 回显与队首一致：确认，不改变显示
    fn confirm(&mut self, update: &PositionUpdate) -> Result<(), GameError> {
        let Some(head) = self.pending.pop_front() else {
            return Ok(());
        };
        if self.history.contains(head.node) {
            self.history.set_clocks(head.node, clocks_of(update))?;
            if update.last_move_san.is_some() {
                self.history.set_san(head.node, update.last_move_san.clone())?;
            }
            self.server_node = head.node;
        }
        if self.pending.is_empty() {
            self.restore_node = None;
            self.run_remove_request();
        }
        Ok(())
    }

    /// 失步：丢弃所有投机状态，光标回到第一步走子前
    fn rollback(&mut self) -> Result<(), GameError> {
        let speculative = self.pending.iter().find(|p| p.created).map(|p| p.node);
        self.pending.clear();
        self.pending_branch = None;
        if let Some(restore) = self.restore_node.take() {
            if self.history.contains(restore) {
                self.history.display(restore)?;
                self.notify(Notification::CursorChanged { node: restore });
            }
        }
        if let Some(node) = speculative {
            if self.history.contains(node) && !self.history.is_ancestor(node, self.history.cursor()) {
                let nodes = self.history.remove(node)?;
                self.notify(Notification::NodesRemoved { nodes });
            }
        }
        self.clear_premoves();
        Ok(())
    }

    /// 把服务器局面应用到着法树：已存在则显示，能由上一局面推出则添加，否则重新锚定
    fn apply_server_position(&mut self, update: &PositionUpdate) -> Result<(), GameError> {
        let clocks = clocks_of(update);

        if let Some(found) = self.locate(&update.fen) {
            self.history.set_clocks(found, clocks)?;
            let follow = self.history.cursor() == self.server_node || self.role == Role::Examining;
            if self.role.is_playing() || self.role.is_observing() {
                self.prune_after(found)?;
            }
            self.server_node = found;
            if follow {
                self.show(found)?;
            }
            return Ok(());
        }

        if let Some(node) = self.derive(update)? {
            self.history.set_clocks(node, clocks)?;
            self.history.set_san(node, update.last_move_san.clone())?;
            return Ok(());
        }

        tracing::warn!(
            "Game {}: position cannot be derived, re-anchoring at {}",
            self.id,
            update.fen
        );
        let mut history = History::anchored(&update.fen);
        for (key, value) in self.history.metatags() {
            history.set_metatag(key, value);
        }
        let root = history.root();
        history.set_clocks(root, clocks)?;
        self.history = history;
        self.server_node = root;
        self.pending.clear();
        self.restore_node = None;
        self.remove_request = None;
        self.pending_branch = None;
        self.refresh_edit_mode();
        self.notify(Notification::HistoryReset);
        self.notify(Notification::CursorChanged { node: root });
        Ok(())
    }

    /// 先在显示线上找，再在服务器所在线上找
    fn locate(&self, fen: &str) -> Option<NodeId> {
        self.history.find(fen).or_else(|| {
            if self.history.contains(self.server_node) {
                self.history.find_from(self.server_node, fen)
            } else {
                None
            }
        })
    }

    /// 服务器悔棋后剪掉该节点之后的主线
    fn prune_after(&mut self, node: NodeId) -> Result<(), GameError> {
        let Some(next) = self.history.get(node)?.mainline_next else {
            return Ok(());
        };
        if self.history.is_ancestor(next, self.history.cursor()) {
            self.show(node)?;
        }
        let nodes = self.history.remove(next)?;
        tracing::debug!("Game {}: pruned {} node(s) after takeback", self.id, nodes.len());
        self.notify(Notification::NodesRemoved { nodes });
        Ok(())
    }

    /// 用规则库从服务器上一节点推出新局面并加入着法树
    fn derive(&mut self, update: &PositionUpdate) -> Result<Option<NodeId>, GameError> {
        let Some(mv) = update.last_move else {
            return Ok(None);
        };
        let base = if self.history.contains(self.server_node) {
            self.server_node
        } else {
            self.history.tip()
        };
        let base_node = self.history.get(base)?;
        let applied = match self.ctx.oracle.apply_move(
            &base_node.fen,
            &mv,
            self.history.initial_fen(),
            self.variant,
            base_node.variant_data.as_deref(),
            false,
        ) {
            Ok(applied) if Fen::same_position(&applied.fen, &update.fen) => applied,
            Ok(_) | Err(_) => return Ok(None),
        };

        let follow = self.history.cursor() == base || self.role == Role::Examining;
        let placement = self.server_placement(base, &applied.fen);
        let node = self.place(base, &applied, placement)?;
        if placement == pipeline::Placement::Subvariation
            && self.role == Role::Examining
            && self.ctx.settings.edit_policy == EditPolicy::Ask
        {
            self.pending_branch = Some(PendingBranch::Server { node });
            self.notify(Notification::BranchChoiceRequired { node });
        }
        self.server_node = node;
        if follow {
            self.show(node)?;
        }
        Ok(Some(node))
    }

    /// 对手走子后处理预走棋：被吃则整队取消，重新校验，轮到本方时执行一步
    fn after_position(&mut self, update: &PositionUpdate, sink: &mut dyn CommandSink) -> Result<(), GameError> {
        if !self.role.is_playing() || self.premoves.is_empty() {
            return Ok(());
        }
        let Some(local) = self.local_side else {
            return Ok(());
        };
        if update.side_to_move() != Some(local) {
            return Ok(());
        }

        if let Some(last) = update.last_move {
            if self.premoves.touches(last.to) {
                tracing::info!("Game {}: premoved piece captured, cancelling premoves", self.id);
                self.clear_premoves();
                return Ok(());
            }
        }

        let oracle = Arc::clone(&self.ctx.oracle);
        let initial = self.history.initial_fen().to_string();
        let variant = self.variant;
        let tip_data = self
            .history
            .get(self.history.tip())
            .ok()
            .filter(|n| Fen::same_position(&n.fen, &update.fen))
            .and_then(|n| n.variant_data.clone());
        let dropped = self
            .premoves
            .revalidate(&update.fen, tip_data.as_deref(), local, |fen, data, mv| {
                oracle.apply_move(fen, mv, &initial, variant, data, true).ok()
            });
        if dropped > 0 && self.premoves.is_empty() {
            self.notify(Notification::PremovesCleared);
        }

        if let Some(premove) = self.premoves.pop() {
            tracing::debug!("Game {}: executing premove {}", self.id, premove.mv.to_uci());
            self.user_move(premove.mv, sink)?;
        }
        Ok(())
    }

    // === 角色 ===

    fn set_role(&mut self, role: Role, local: Option<Color>) {
        self.local_side = local;
        if role == self.role {
            return;
        }
        tracing::info!("Game {}: role {:?} -> {:?}", self.id, self.role, role);
        let from = self.role;
        self.role = role;
        if !role.can_send_moves() {
            self.pending.clear();
            self.restore_node = None;
        }
        if !role.is_playing() {
            self.clear_premoves();
        }
        if role != Role::Examining {
            self.pending_branch = None;
        }
        self.refresh_edit_mode();
        self.notify(Notification::RoleChanged { from, to: role });
    }

    fn refresh_edit_mode(&mut self) {
        let edit = self.role == Role::Examining
            || (self.role == Role::None && self.history.is_scratch());
        self.history.set_edit_mode(edit);
    }

    // === 光标与编辑 ===

    fn navigate(&mut self, nav: Navigation) -> Result<(), GameError> {
        let node = match nav {
            Navigation::First => Some(self.history.first()),
            Navigation::Prev => self.history.prev(),
            Navigation::Next => self.history.next(),
            Navigation::Last => Some(self.history.last()),
            Navigation::To(node) => Some(self.history.display(node).map(|_| node)?),
        };
        if let Some(node) = node {
            self.notify(Notification::CursorChanged { node });
        }
        Ok(())
    }

    fn show(&mut self, node: NodeId) -> Result<(), GameError> {
        if self.history.cursor() != node {
            self.history.display(node)?;
            self.notify(Notification::CursorChanged { node });
        }
        Ok(())
    }

    /// 删除节点；有待确认走法时延后到队列清空再执行，返回是否已删除
    pub fn request_remove(&mut self, node: NodeId) -> Result<bool, GameError> {
        if !self.pending.is_empty() {
            self.remove_request = Some(node);
            return Ok(false);
        }
        let nodes = self.history.remove(node)?;
        self.notify(Notification::NodesRemoved { nodes });
        Ok(true)
    }

    fn run_remove_request(&mut self) {
        let Some(node) = self.remove_request.take() else {
            return;
        };
        if !self.history.contains(node) {
            return;
        }
        if self.history.is_ancestor(node, self.history.cursor()) {
            if let Some(parent) = self.history.node(node).and_then(|n| n.parent) {
                let _ = self.show(parent);
            }
        }
        if self.history.is_ancestor(node, self.server_node) {
            if let Some(parent) = self.history.node(node).and_then(|n| n.parent) {
                self.server_node = parent;
            }
        }
        match self.history.remove(node) {
            Ok(nodes) => self.notify(Notification::NodesRemoved { nodes }),
            Err(e) => tracing::error!("Game {}: deferred removal failed: {}", self.id, e),
        }
    }

    fn cancel_premoves(&mut self) {
        if !self.premoves.is_empty() {
            tracing::debug!("Game {}: premoves cancelled by user", self.id);
        }
        self.clear_premoves();
    }

    fn clear_premoves(&mut self) {
        if self.premoves.clear() > 0 {
            self.notify(Notification::PremovesCleared);
        }
    }

    fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }
}

fn clocks_of(update: &PositionUpdate) -> Clocks {
    Clocks::new(update.white_clock_ms, update.black_clock_ms)
}
